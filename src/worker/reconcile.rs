use std::collections::HashSet;

use crate::error::{FleetError, Result};
use crate::worker::{Worker, WorkerManager};

impl WorkerManager {
    /// Converge the fleet onto `desired`, the complete set of workers that
    /// should exist.
    ///
    /// Every desired worker is deleted and recreated from scratch, its artifact
    /// cleared and rewritten. Workers present before the sync but absent from
    /// `desired` are then deleted. A failing step is logged and the worker is
    /// skipped; the remaining workers are still processed. Only the initial
    /// snapshot aborts the sync.
    ///
    /// Returns [`FleetError::PartialFailure`] if any step failed. Which workers
    /// failed is only recorded in the logs.
    pub async fn sync_workers(&self, desired: &[Worker]) -> Result<()> {
        let snapshot = self.store().admin_list_all()?;
        let desired_uids: HashSet<&str> = desired.iter().map(|w| w.uid.as_str()).collect();
        let mut failed = 0usize;

        for worker in desired {
            if let Err(e) = self.recreate(worker).await {
                tracing::error!(
                    uid = %worker.uid,
                    name = %worker.name,
                    owner_id = worker.owner_id,
                    node = %worker.node_name,
                    error = %e,
                    "Worker sync failed"
                );
                failed += 1;
            }
        }

        let stale: Vec<Worker> = snapshot
            .into_iter()
            .map(|r| r.worker)
            .filter(|w| !desired_uids.contains(w.uid.as_str()))
            .collect();
        // Tunnels are keyed by name, so a stale worker must not take down the
        // tunnel of a desired worker redeployed under the same name.
        let claimed: HashSet<&str> = desired
            .iter()
            .filter(|w| self.is_local(w))
            .map(|w| w.name.as_str())
            .collect();
        for worker in &stale {
            let keep_tunnel = self.is_local(worker) && claimed.contains(worker.name.as_str());
            if let Err(e) = self.prune(worker, keep_tunnel).await {
                tracing::error!(
                    uid = %worker.uid,
                    name = %worker.name,
                    node = %worker.node_name,
                    error = %e,
                    "Stale worker removal failed"
                );
                failed += 1;
            }
        }

        tracing::info!(
            desired = desired.len(),
            pruned = stale.len(),
            failed,
            "Worker sync finished"
        );

        if failed > 0 {
            return Err(FleetError::PartialFailure);
        }
        Ok(())
    }

    async fn recreate(&self, worker: &Worker) -> Result<()> {
        match self.delete(worker).await {
            Err(e) if e.is_fatal() => return Err(e),
            _ => {}
        }
        self.create(worker).await?;
        self.delete_artifact(worker).await?;
        self.write_artifact(worker).await
    }

    async fn prune(&self, worker: &Worker, keep_tunnel: bool) -> Result<()> {
        match self.delete_with(worker, !keep_tunnel).await {
            Err(e) if e.is_fatal() => Err(e),
            _ => self.delete_artifact(worker).await,
        }
    }
}
