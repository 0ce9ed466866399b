use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::error::{FleetError, Result};
use crate::fleet::events::worker_from_payload;
use crate::fleet::EventKind;
use crate::proto::fleet_service_server::FleetService;
use crate::proto::{EventRequest, EventResponse};
use crate::worker::{Worker, WorkerManager};

/// gRPC endpoint receiving worker events from other nodes.
///
/// Delivery is at-least-once and unordered, so both events are applied as
/// idempotent operations keyed by UID.
pub struct FleetEventService {
    manager: Arc<WorkerManager>,
}

impl FleetEventService {
    pub fn new(manager: Arc<WorkerManager>) -> Self {
        Self { manager }
    }

    /// Apply one event. Returns whether local state changed.
    pub async fn apply(&self, kind: EventKind, worker: &Worker) -> Result<bool> {
        // Applying a foreign worker here would dispatch the event onwards again.
        if !self.manager.is_local(worker) {
            return Err(FleetError::InvalidPayload(format!(
                "worker {} belongs to {}, not {}",
                worker.uid,
                worker.node_name,
                self.manager.local_node()
            )));
        }
        match kind {
            EventKind::AddWorker => {
                match self.manager.delete(worker).await {
                    Err(e) if e.is_fatal() => return Err(e),
                    _ => {}
                }
                self.manager.create(worker).await?;
                Ok(true)
            }
            EventKind::DeleteWorker => match self.manager.delete(worker).await {
                Ok(()) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            },
        }
    }
}

#[tonic::async_trait]
impl FleetService for FleetEventService {
    async fn notify(
        &self,
        request: Request<EventRequest>,
    ) -> std::result::Result<Response<EventResponse>, Status> {
        let req = request.into_inner();
        let kind = EventKind::try_from(req.kind)?;
        let worker = worker_from_payload(&req.payload)?;
        tracing::debug!(
            source = %req.source_node,
            kind = %kind,
            uid = %worker.uid,
            "Received fleet event"
        );

        let applied = self.apply(kind, &worker).await.map_err(|e| {
            tracing::warn!(uid = %worker.uid, kind = %kind, error = %e, "Fleet event rejected");
            Status::from(e)
        })?;
        Ok(Response::new(EventResponse { applied }))
    }
}
