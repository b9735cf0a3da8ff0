//! Listening-port discovery.
//!
//! Allocation binds and immediately releases each candidate, so the result
//! is only a hint: another process can take the port before the caller
//! binds it. Callers treat a later bind failure as retryable and allocate
//! again (see `server::lifecycle`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

use tracing::debug;

use crate::errors::SyncError;

pub const MIN_PORT: u16 = 5000;
pub const MAX_PORT: u16 = 5999;

/// Finds a free port in a closed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocator {
    host: IpAddr,
    min: u16,
    max: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            min: MIN_PORT,
            max: MAX_PORT,
        }
    }
}

impl PortAllocator {
    pub fn new(host: IpAddr) -> Self {
        Self {
            host,
            ..Self::default()
        }
    }

    /// Restrict probing to `[min, max]`.
    pub fn with_range(mut self, min: u16, max: u16) -> Self {
        self.min = min.min(max);
        self.max = max.max(min);
        self
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min, self.max)
    }

    /// First bindable port at or after `preferred`, or at or after the
    /// range start when `preferred` is outside the range.
    pub fn allocate(&self, preferred: u16) -> Result<u16, SyncError> {
        let start = if (self.min..=self.max).contains(&preferred) {
            preferred
        } else {
            self.min
        };

        for port in start..=self.max {
            if self.is_available(port) {
                return Ok(port);
            }
            debug!(port, "port unavailable, trying next");
        }

        Err(SyncError::NoPortAvailable {
            min: self.min,
            max: self.max,
        })
    }

    fn is_available(&self, port: u16) -> bool {
        // The listener drops at the end of this statement, releasing the port.
        TcpListener::bind(SocketAddr::new(self.host, port)).is_ok()
    }
}
