//! Outbound TCP connection management.
//!
//! Resolves the server name, shuffles the addresses and dials them one after
//! the other with a bounded connect timeout.

use std::net::SocketAddr;
use std::time::Duration;

use ircddb_core::TransportError;
use rand::seq::SliceRandom;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-address connect timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolution results at or above this count are rejected.
pub const MAX_ADDRESSES: usize = 15;

#[derive(Debug, Clone)]
pub struct ConnectionManager {
    host: String,
    port: u16,
}

impl ConnectionManager {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::Resolve {
                host: self.host.clone(),
                reason: e.to_string(),
            })?
            .collect();

        if addrs.is_empty() || addrs.len() >= MAX_ADDRESSES {
            return Err(TransportError::AddressCount {
                host: self.host.clone(),
                count: addrs.len(),
            });
        }
        debug!("Resolved {} to {} address(es)", self.host, addrs.len());
        Ok(addrs)
    }

    /// Resolve and dial, returning the first stream that connects.
    pub async fn connect(&self) -> Result<TcpStream, TransportError> {
        let addrs = self.resolve().await?;
        connect_any(&self.host, addrs).await
    }
}

/// Try `addrs` in random order.
pub async fn connect_any(
    host: &str,
    mut addrs: Vec<SocketAddr>,
) -> Result<TcpStream, TransportError> {
    addrs.shuffle(&mut rand::rng());

    for addr in addrs {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {} ({})", host, addr);
                return Ok(stream);
            }
            Ok(Err(e)) => warn!("Connect to {} failed: {}", addr, e),
            Err(_) => warn!("Connect to {} timed out", addr),
        }
    }
    Err(TransportError::NoConnection(host.to_string()))
}
