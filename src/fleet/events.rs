use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};

use crate::error::{FleetError, Result};
use crate::fleet::NodeInfo;
use crate::proto;
use crate::proto::fleet_service_client::FleetServiceClient;
use crate::worker::Worker;

/// Payload key carrying the protobuf-encoded worker.
pub const KEY_WORKER_PROTO: &str = "worker_proto";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AddWorker,
    DeleteWorker,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::AddWorker => write!(f, "add_worker"),
            EventKind::DeleteWorker => write!(f, "delete_worker"),
        }
    }
}

impl From<EventKind> for proto::EventKind {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::AddWorker => proto::EventKind::AddWorker,
            EventKind::DeleteWorker => proto::EventKind::DeleteWorker,
        }
    }
}

impl TryFrom<i32> for EventKind {
    type Error = FleetError;

    fn try_from(raw: i32) -> Result<Self> {
        match proto::EventKind::try_from(raw) {
            Ok(proto::EventKind::AddWorker) => Ok(EventKind::AddWorker),
            Ok(proto::EventKind::DeleteWorker) => Ok(EventKind::DeleteWorker),
            _ => Err(FleetError::InvalidPayload(format!(
                "unsupported event kind {}",
                raw
            ))),
        }
    }
}

pub fn worker_payload(worker: &Worker) -> HashMap<String, Vec<u8>> {
    HashMap::from([(KEY_WORKER_PROTO.to_string(), worker.encode_to_vec())])
}

pub fn worker_from_payload(payload: &HashMap<String, Vec<u8>>) -> Result<Worker> {
    let raw = payload
        .get(KEY_WORKER_PROTO)
        .ok_or_else(|| FleetError::InvalidPayload(format!("missing {}", KEY_WORKER_PROTO)))?;
    Worker::decode(raw)
}

/// Best-effort delivery of worker events to a named node.
///
/// Callers spawn `notify` and never await the outcome, so implementations
/// report delivery problems through logs only.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn notify(&self, node: &NodeInfo, kind: EventKind, payload: HashMap<String, Vec<u8>>);
}

/// [`EventBus`] over the `FleetService.Notify` RPC.
///
/// Clients are cached per node name and evicted after a failed call so the
/// next event reconnects.
pub struct GrpcEventBus {
    source_node: String,
    connect_timeout: Duration,
    clients: Mutex<HashMap<String, FleetServiceClient<Channel>>>,
}

impl GrpcEventBus {
    pub fn new(source_node: impl Into<String>) -> Self {
        Self {
            source_node: source_node.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn client(&self, node: &NodeInfo) -> Result<FleetServiceClient<Channel>> {
        if let Some(client) = self.clients.lock().await.get(&node.name) {
            return Ok(client.clone());
        }
        let channel = Endpoint::from_shared(node.endpoint())?
            .connect_timeout(self.connect_timeout)
            .connect()
            .await?;
        let client = FleetServiceClient::new(channel);
        self.clients
            .lock()
            .await
            .insert(node.name.clone(), client.clone());
        Ok(client)
    }

    async fn send(
        &self,
        node: &NodeInfo,
        kind: EventKind,
        payload: HashMap<String, Vec<u8>>,
    ) -> Result<bool> {
        let mut client = self.client(node).await?;
        let request = proto::EventRequest {
            kind: proto::EventKind::from(kind) as i32,
            source_node: self.source_node.clone(),
            payload,
        };
        let response = client.notify(request).await?;
        Ok(response.into_inner().applied)
    }
}

#[async_trait]
impl EventBus for GrpcEventBus {
    async fn notify(&self, node: &NodeInfo, kind: EventKind, payload: HashMap<String, Vec<u8>>) {
        match self.send(node, kind, payload).await {
            Ok(applied) => {
                tracing::debug!(node = %node.name, kind = %kind, applied, "Fleet event delivered");
            }
            Err(e) => {
                self.clients.lock().await.remove(&node.name);
                tracing::warn!(
                    node = %node.name,
                    addr = %node.addr,
                    kind = %kind,
                    error = %e,
                    "Fleet event delivery failed"
                );
            }
        }
    }
}
