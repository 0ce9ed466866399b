use std::sync::Arc;

use uuid::Uuid;

use crate::artifact::CodeStore;
use crate::error::Result;
use crate::fleet::events::worker_payload;
use crate::fleet::{EventBus, EventKind, FleetDirectory};
use crate::ports::PortAllocator;
use crate::store::WorkerStore;
use crate::tunnel::TunnelAdapter;
use crate::worker::Worker;

/// Collaborators the manager sequences side effects against.
#[derive(Clone)]
pub struct ManagerDeps {
    pub store: Arc<dyn WorkerStore>,
    pub tunnels: Arc<dyn TunnelAdapter>,
    pub code: Arc<dyn CodeStore>,
    pub directory: Arc<dyn FleetDirectory>,
    pub bus: Arc<dyn EventBus>,
    pub ports: Arc<dyn PortAllocator>,
}

/// Applies worker mutations on behalf of one node.
///
/// Calls for different workers may run concurrently. Calls for the same UID
/// are not coordinated here; callers serialize them or accept last-writer-wins.
pub struct WorkerManager {
    local_node: String,
    host_name: String,
    deps: ManagerDeps,
}

impl WorkerManager {
    pub fn new(
        local_node: impl Into<String>,
        host_name: impl Into<String>,
        deps: ManagerDeps,
    ) -> Self {
        Self {
            local_node: local_node.into(),
            host_name: host_name.into(),
            deps,
        }
    }

    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    pub fn store(&self) -> &Arc<dyn WorkerStore> {
        &self.deps.store
    }

    pub fn is_local(&self, worker: &Worker) -> bool {
        worker.node_name == self.local_node
    }

    /// Bring a new worker into the fleet and persist its record.
    ///
    /// On the owning node the tunnel and artifact are set up first and nothing
    /// is persisted if either fails. For a remote owner an `AddWorker` event is
    /// dispatched without waiting and the record is persisted regardless of
    /// the eventual remote outcome.
    pub async fn create(&self, worker: &Worker) -> Result<()> {
        if self.is_local(worker) {
            self.register_tunnel(worker).await?;
            self.write_artifact(worker).await?;
        } else {
            self.dispatch(worker, EventKind::AddWorker)?;
        }
        self.deps.store.create(worker)?;
        tracing::info!(uid = %worker.uid, name = %worker.name, node = %worker.node_name, "Worker created");
        Ok(())
    }

    /// Re-expose and rewrite a local worker, then upsert its record.
    ///
    /// Updates to remotely owned workers only touch the local record; no event
    /// is sent to the owning node.
    pub async fn update(&self, worker: &Worker) -> Result<()> {
        if self.is_local(worker) {
            self.unregister_tunnel(worker).await;
            self.register_tunnel(worker).await?;
            self.write_artifact(worker).await?;
        } else {
            tracing::debug!(uid = %worker.uid, node = %worker.node_name, "Remote worker updated locally only");
        }
        self.deps.store.save(worker)?;
        tracing::info!(uid = %worker.uid, name = %worker.name, port = worker.port, "Worker updated");
        Ok(())
    }

    /// Tear the worker down and hard-delete its record and artifact.
    ///
    /// A missing record is reported as `NotFound` after the artifact has been
    /// removed, so repeated deletes converge on the same state. Any other
    /// record store failure stops before the artifact is touched.
    pub async fn delete(&self, worker: &Worker) -> Result<()> {
        self.delete_with(worker, true).await
    }

    /// [`delete`](Self::delete), optionally leaving the local tunnel for
    /// `worker.name` in place for a newer worker that now holds that name.
    pub(super) async fn delete_with(&self, worker: &Worker, remove_tunnel: bool) -> Result<()> {
        if self.is_local(worker) {
            if remove_tunnel {
                self.unregister_tunnel(worker).await;
            }
        } else {
            self.dispatch(worker, EventKind::DeleteWorker)?;
        }
        let removed = self.deps.store.hard_delete(&worker.uid);
        if let Err(e) = &removed {
            if e.is_fatal() {
                return removed;
            }
        }
        self.delete_artifact(worker).await?;
        removed?;
        tracing::info!(uid = %worker.uid, name = %worker.name, "Worker deleted");
        Ok(())
    }

    /// Rebind the worker to a freshly allocated port.
    ///
    /// Generates a tunnel id if the worker has none, clears the artifact and
    /// re-applies the worker through [`update`](Self::update). An existing
    /// tunnel id is preserved.
    pub async fn flush(&self, worker: &mut Worker) -> Result<()> {
        let port = self.deps.ports.available_port(&self.host_name)?;
        if !worker.has_tunnel() {
            worker.tunnel_id = Uuid::new_v4().to_string();
        }
        self.delete_artifact(worker).await?;
        worker.port = port;
        self.update(worker).await
    }

    pub async fn write_artifact(&self, worker: &Worker) -> Result<()> {
        self.deps
            .code
            .write_artifact(&worker.uid, &worker.entry, &worker.code)
            .await
    }

    pub async fn delete_artifact(&self, worker: &Worker) -> Result<()> {
        self.deps.code.delete_artifact(&worker.uid).await
    }

    async fn register_tunnel(&self, worker: &Worker) -> Result<()> {
        if !worker.has_tunnel() {
            tracing::debug!(uid = %worker.uid, "No tunnel id yet, skipping tunnel registration");
            return Ok(());
        }
        self.deps
            .tunnels
            .add_tunnel(&worker.tunnel_id, &worker.name, worker.port)
            .await
    }

    async fn unregister_tunnel(&self, worker: &Worker) {
        if let Err(e) = self.deps.tunnels.remove_tunnel(&worker.name).await {
            tracing::warn!(uid = %worker.uid, name = %worker.name, error = %e, "Failed to remove tunnel");
        }
    }

    /// Resolve the owning node and hand the event to the bus in the background.
    fn dispatch(&self, worker: &Worker, kind: EventKind) -> Result<()> {
        let node = self.deps.directory.resolve_node(&worker.node_name)?;
        let payload = worker_payload(worker);
        let bus = self.deps.bus.clone();
        tracing::debug!(uid = %worker.uid, node = %node.name, kind = %kind, "Dispatching fleet event");
        tokio::spawn(async move {
            bus.notify(&node, kind, payload).await;
        });
        Ok(())
    }
}
