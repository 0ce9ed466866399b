use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{FleetError, Result};

/// Port-forward registrations exposing worker ports under stable tunnel ids.
#[async_trait]
pub trait TunnelAdapter: Send + Sync {
    async fn add_tunnel(&self, tunnel_id: &str, name: &str, port: u16) -> Result<()>;

    /// Removing an unknown name succeeds.
    async fn remove_tunnel(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEntry {
    pub tunnel_id: String,
    pub port: u16,
}

/// In-process tunnel table keyed by worker name.
///
/// A name maps to at most one registration; registering a name that is already
/// bound to a different tunnel id is rejected so that two workers never share
/// one exposure.
#[derive(Debug, Default)]
pub struct TunnelTable {
    entries: RwLock<HashMap<String, TunnelEntry>>,
}

impl TunnelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<TunnelEntry> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl TunnelAdapter for TunnelTable {
    async fn add_tunnel(&self, tunnel_id: &str, name: &str, port: u16) -> Result<()> {
        if tunnel_id.is_empty() {
            return Err(FleetError::Tunnel(format!("empty tunnel id for {}", name)));
        }
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(name) {
            if existing.tunnel_id != tunnel_id {
                return Err(FleetError::Tunnel(format!(
                    "{} already bound to tunnel {}",
                    name, existing.tunnel_id
                )));
            }
        }
        entries.insert(
            name.to_string(),
            TunnelEntry {
                tunnel_id: tunnel_id.to_string(),
                port,
            },
        );
        tracing::debug!(name, tunnel_id, port, "Tunnel registered");
        Ok(())
    }

    async fn remove_tunnel(&self, name: &str) -> Result<()> {
        if self.entries.write().await.remove(name).is_some() {
            tracing::debug!(name, "Tunnel removed");
        }
        Ok(())
    }
}
