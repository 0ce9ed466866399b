//! Worker lifecycle and fleet reconciliation.
//!
//! A worker is owned by exactly one node. Mutations on the owning node touch
//! three stores in sequence (tunnel table, code artifact, record store);
//! mutations for a worker owned elsewhere are forwarded over the fleet event
//! bus and only the record is written locally.
//!
//! # Components
//!
//! - [`Worker`] / [`WorkerRecord`]: the entity and its stored row
//! - [`WorkerManager`]: create, update, delete and flush for one worker
//! - [`WorkerManager::sync_workers`]: replace-all reconciliation of the fleet
//!
//! # Consistency
//!
//! No transaction spans the stores. Single-worker operations stop at the first
//! fatal error without rolling back earlier steps; the next reconciliation pass
//! repairs whatever was left behind.

pub mod lifecycle;
pub mod model;
pub mod reconcile;

pub use lifecycle::{ManagerDeps, WorkerManager};
pub use model::{into_workers, Worker, WorkerRecord};
