use std::net::TcpListener;

use rand::Rng;

use crate::config::PortRange;
use crate::error::{FleetError, Result};

pub trait PortAllocator: Send + Sync {
    /// A port on `host` that is free right now.
    fn available_port(&self, host: &str) -> Result<u16>;
}

/// Finds a free port by binding candidates within a fixed range.
///
/// Probing starts at a random offset so that concurrent flushes on one host
/// rarely race for the same port. The probe listener is dropped before
/// returning; the caller owns the race with other processes from there.
#[derive(Debug, Clone)]
pub struct LocalPortAllocator {
    range: PortRange,
}

impl LocalPortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self { range }
    }
}

impl PortAllocator for LocalPortAllocator {
    fn available_port(&self, host: &str) -> Result<u16> {
        let span = self.range.len();
        if span == 0 {
            return Err(FleetError::NoPortAvailable(host.to_string()));
        }
        let start = rand::thread_rng().gen_range(0..span);
        for step in 0..span {
            let port = self.range.min + ((start + step) % span) as u16;
            if TcpListener::bind((host, port)).is_ok() {
                return Ok(port);
            }
        }
        tracing::warn!(host, min = self.range.min, max = self.range.max, "Port range exhausted");
        Err(FleetError::NoPortAvailable(host.to_string()))
    }
}
