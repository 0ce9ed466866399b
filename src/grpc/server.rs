use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::fleet::FleetEventService;
use crate::proto::fleet_service_server::FleetServiceServer;
use crate::worker::WorkerManager;

pub struct GrpcServer {
    addr: SocketAddr,
    manager: Arc<WorkerManager>,
}

impl GrpcServer {
    pub fn new(addr: SocketAddr, manager: Arc<WorkerManager>) -> Self {
        Self { addr, manager }
    }

    /// Serve the fleet event endpoint until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let fleet_service = FleetEventService::new(self.manager.clone());

        tracing::info!(
            addr = %self.addr,
            node = %self.manager.local_node(),
            "Starting gRPC server"
        );

        Server::builder()
            .add_service(FleetServiceServer::new(fleet_service))
            .serve_with_shutdown(self.addr, async move { shutdown.cancelled().await })
            .await
    }
}
