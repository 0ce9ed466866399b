//! Relational record store for worker metadata.
//!
//! Records are keyed by UID and scoped by owner. Every query hides soft-deleted
//! rows and returns an empty vector when nothing matches; single-record lookups
//! fail with [`FleetError::NotFound`](crate::error::FleetError::NotFound).
//!
//! The `admin_*` queries ignore ownership and are meant for fleet-wide
//! operations such as reconciliation.

pub mod sqlite;

use std::collections::HashMap;

use crate::error::Result;
use crate::worker::{Worker, WorkerRecord};

pub use sqlite::SqliteWorkerStore;

pub trait WorkerStore: Send + Sync {
    /// Insert a new record. Fails if the UID already exists.
    fn create(&self, worker: &Worker) -> Result<()>;

    /// Insert or update the record with the worker's UID.
    fn save(&self, worker: &Worker) -> Result<()>;

    /// Remove the row permanently, including a soft-deleted one.
    fn hard_delete(&self, uid: &str) -> Result<()>;

    /// Mark the row deleted while retaining it for audit.
    fn soft_delete(&self, uid: &str) -> Result<()>;

    fn get_by_uid(&self, owner_id: u64, uid: &str) -> Result<WorkerRecord>;

    fn list_by_owner(&self, owner_id: u64) -> Result<Vec<WorkerRecord>>;

    fn list_page(&self, owner_id: u64, offset: usize, limit: usize)
        -> Result<Vec<WorkerRecord>>;

    fn list_by_names(&self, owner_id: u64, names: &[&str]) -> Result<Vec<WorkerRecord>>;

    fn admin_list_by_names(&self, names: &[&str]) -> Result<Vec<WorkerRecord>>;

    fn admin_list_by_node(&self, node_name: &str) -> Result<Vec<WorkerRecord>>;

    fn admin_list_all(&self) -> Result<Vec<WorkerRecord>>;

    /// Worker name to tunnel id across the whole fleet.
    fn admin_tunnel_map(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .admin_list_all()?
            .into_iter()
            .map(|r| (r.worker.name, r.worker.tunnel_id))
            .collect())
    }
}
