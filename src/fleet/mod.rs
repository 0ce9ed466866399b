//! Fleet membership and cross-node notification.
//!
//! - [`FleetDirectory`]: resolves a node name to its RPC address
//! - [`EventBus`]: fire-and-forget delivery of worker events to a node
//! - [`FleetEventService`]: the receiving end, applying events to the local node
//!
//! Node identity is resolved by name on every dispatch, so nodes may join or
//! leave independently of the worker records that reference them.

pub mod events;
pub mod service;

use std::collections::HashMap;

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};

pub use events::{EventBus, EventKind, GrpcEventBus, KEY_WORKER_PROTO};
pub use service::FleetEventService;

/// Routing info for one fleet member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub addr: String,
}

impl NodeInfo {
    pub fn endpoint(&self) -> String {
        if self.addr.starts_with("http://") || self.addr.starts_with("https://") {
            self.addr.clone()
        } else {
            format!("http://{}", self.addr)
        }
    }
}

pub trait FleetDirectory: Send + Sync {
    fn resolve_node(&self, node_name: &str) -> Result<NodeInfo>;
}

/// Directory built from the configured peer list.
#[derive(Debug, Clone, Default)]
pub struct StaticFleetDirectory {
    nodes: HashMap<String, NodeInfo>,
}

impl StaticFleetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// This node plus every configured peer.
    pub fn from_config(config: &FleetConfig) -> Self {
        let mut directory = Self::new().with_node(&config.node_name, config.listen_addr.to_string());
        for peer in &config.peers {
            directory = directory.with_node(&peer.name, &peer.addr);
        }
        directory
    }

    pub fn with_node(mut self, name: impl Into<String>, addr: impl Into<String>) -> Self {
        let name = name.into();
        self.nodes.insert(
            name.clone(),
            NodeInfo {
                name,
                addr: addr.into(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FleetDirectory for StaticFleetDirectory {
    fn resolve_node(&self, node_name: &str) -> Result<NodeInfo> {
        self.nodes
            .get(node_name)
            .cloned()
            .ok_or_else(|| FleetError::NodeNotFound(node_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_includes_self_and_peers() {
        let config = FleetConfig::new("a", "127.0.0.1:50061".parse().unwrap())
            .with_peer("b", "127.0.0.1:50062")
            .with_peer("c", "node-c:50063");
        let directory = StaticFleetDirectory::from_config(&config);

        assert_eq!(directory.len(), 3);
        assert_eq!(directory.resolve_node("a").unwrap().addr, "127.0.0.1:50061");
        assert_eq!(
            directory.resolve_node("c").unwrap().endpoint(),
            "http://node-c:50063"
        );
    }

    #[test]
    fn unknown_node() {
        let directory = StaticFleetDirectory::new().with_node("a", "127.0.0.1:1");
        let err = directory.resolve_node("b").unwrap_err();
        assert!(matches!(err, FleetError::NodeNotFound(name) if name == "b"));
    }

    #[test]
    fn endpoint_keeps_explicit_scheme() {
        let node = NodeInfo {
            name: "a".into(),
            addr: "https://a.fleet:443".into(),
        };
        assert_eq!(node.endpoint(), "https://a.fleet:443");
    }
}
