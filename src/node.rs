use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::artifact::FsCodeStore;
use crate::config::FleetConfig;
use crate::error::Result;
use crate::fleet::{GrpcEventBus, StaticFleetDirectory};
use crate::grpc::GrpcServer;
use crate::ports::LocalPortAllocator;
use crate::store::SqliteWorkerStore;
use crate::tunnel::TunnelTable;
use crate::worker::{ManagerDeps, WorkerManager};

/// A fleet member: the worker manager over this node's stores, plus the RPC
/// endpoint other nodes notify.
pub struct FleetNode {
    pub config: FleetConfig,
    pub manager: Arc<WorkerManager>,
    pub tunnels: Arc<TunnelTable>,
}

impl FleetNode {
    /// Open the record store and wire the concrete collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQLite database cannot be opened or migrated.
    pub fn open(config: FleetConfig) -> Result<Self> {
        let store = match &config.database_path {
            Some(path) => SqliteWorkerStore::open(path)?,
            None => SqliteWorkerStore::in_memory()?,
        };
        let tunnels = Arc::new(TunnelTable::new());
        let deps = ManagerDeps {
            store: Arc::new(store),
            tunnels: tunnels.clone(),
            code: Arc::new(FsCodeStore::new(config.code_dir())),
            directory: Arc::new(StaticFleetDirectory::from_config(&config)),
            bus: Arc::new(GrpcEventBus::new(config.node_name.clone())),
            ports: Arc::new(LocalPortAllocator::new(config.port_range)),
        };
        let manager = Arc::new(WorkerManager::new(
            config.node_name.clone(),
            config.host_name.clone(),
            deps,
        ));

        tracing::info!(
            node = %config.node_name,
            workerd_dir = %config.workerd_dir.display(),
            peers = config.peers.len(),
            "Fleet node initialized"
        );

        Ok(Self {
            config,
            manager,
            tunnels,
        })
    }

    /// Serve fleet events until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC server fails to bind or stops abnormally.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let server = GrpcServer::new(self.config.listen_addr, self.manager.clone());
        server.run(shutdown).await?;
        tracing::info!(node = %self.config.node_name, "Fleet node stopped");
        Ok(())
    }
}
