use chrono::{DateTime, Utc};
use prost::Message;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::proto;

/// A deployable unit of code bound to a tunnelled port on one fleet node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub uid: String,
    pub name: String,
    pub owner_id: u64,
    pub node_name: String,
    pub tunnel_id: String,
    pub port: u16,
    pub entry: String,
    pub code: Vec<u8>,
}

impl Worker {
    /// New worker with a freshly generated UID. The tunnel id stays empty until
    /// the first flush.
    pub fn new(
        owner_id: u64,
        name: impl Into<String>,
        node_name: impl Into<String>,
        entry: impl Into<String>,
        code: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            name: name.into(),
            owner_id,
            node_name: node_name.into(),
            tunnel_id: String::new(),
            port: 0,
            entry: entry.into(),
            code: code.into(),
        }
    }

    pub fn has_tunnel(&self) -> bool {
        !self.tunnel_id.is_empty()
    }

    /// Protobuf encoding carried in fleet event payloads.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        proto::Worker::from(self).encode_to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let wire = proto::Worker::decode(buf)?;
        Self::try_from(wire)
    }
}

impl From<&Worker> for proto::Worker {
    fn from(w: &Worker) -> Self {
        proto::Worker {
            uid: w.uid.clone(),
            name: w.name.clone(),
            owner_id: w.owner_id,
            node_name: w.node_name.clone(),
            tunnel_id: w.tunnel_id.clone(),
            port: u32::from(w.port),
            entry: w.entry.clone(),
            code: w.code.clone(),
        }
    }
}

impl TryFrom<proto::Worker> for Worker {
    type Error = FleetError;

    fn try_from(w: proto::Worker) -> Result<Self> {
        if w.uid.is_empty() {
            return Err(FleetError::InvalidPayload("worker uid is empty".to_string()));
        }
        let port = u16::try_from(w.port)
            .map_err(|_| FleetError::InvalidPayload(format!("port {} out of range", w.port)))?;
        Ok(Worker {
            uid: w.uid,
            name: w.name,
            owner_id: w.owner_id,
            node_name: w.node_name,
            tunnel_id: w.tunnel_id,
            port,
            entry: w.entry,
            code: w.code,
        })
    }
}

/// A worker row as kept by the record store, with its bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    pub id: i64,
    pub worker: Worker,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Strip bookkeeping columns from a result set.
pub fn into_workers(records: Vec<WorkerRecord>) -> Vec<Worker> {
    records.into_iter().map(|r| r.worker).collect()
}
