use std::net::SocketAddr;
use std::path::PathBuf;

/// Subdirectory of the workerd directory holding per-worker code.
pub const WORKER_CODE_PATH: &str = "worker";

/// Host the port allocator probes when assigning worker ports.
pub const DEFAULT_HOST_NAME: &str = "localhost";

/// Inclusive range of local ports handed out to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 10000,
            max: 20000,
        }
    }
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Identity of this node; workers whose `node_name` matches are applied locally.
    pub node_name: String,
    pub listen_addr: SocketAddr,
    pub peers: Vec<PeerConfig>,
    /// Root of the workerd tree. Code lives under `<workerd_dir>/worker/<uid>/`.
    pub workerd_dir: PathBuf,
    /// SQLite database file. `None` keeps records in memory.
    pub database_path: Option<PathBuf>,
    pub host_name: String,
    pub port_range: PortRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub name: String,
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            node_name: "default".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50061)),
            peers: Vec::new(),
            workerd_dir: PathBuf::from("workerd"),
            database_path: None,
            host_name: DEFAULT_HOST_NAME.to_string(),
            port_range: PortRange::default(),
        }
    }
}

impl FleetConfig {
    pub fn new(node_name: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_name: node_name.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, name: impl Into<String>, addr: impl Into<String>) -> Self {
        self.peers.push(PeerConfig {
            name: name.into(),
            addr: addr.into(),
        });
        self
    }

    pub fn code_dir(&self) -> PathBuf {
        self.workerd_dir.join(WORKER_CODE_PATH)
    }
}

/// Parse a comma-separated peer list in `name=host:port` form.
///
/// Empty input yields no peers. Entries without `=` or with an empty name or
/// address are rejected with a message naming the offending entry.
pub fn parse_peers(spec: &str) -> Result<Vec<PeerConfig>, String> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (name, addr) = entry
                .split_once('=')
                .ok_or_else(|| format!("invalid peer {:?}, expected name=host:port", entry))?;
            let (name, addr) = (name.trim(), addr.trim());
            if name.is_empty() || addr.is_empty() {
                return Err(format!("invalid peer {:?}, expected name=host:port", entry));
            }
            Ok(PeerConfig {
                name: name.to_string(),
                addr: addr.to_string(),
            })
        })
        .collect()
}
