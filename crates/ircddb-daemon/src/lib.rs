//! ircddb-daemon library: Exposes the gateway components for testing.
//!
//! This is a thin layer over the core state machines: configuration file,
//! TCP transport and the two tick loops.

pub mod config;
pub mod connection;
pub mod gateway;
pub mod transport;

// Re-export key types for convenience
pub use config::Config;
pub use connection::ConnectionManager;
pub use gateway::{EngineLoop, spawn_driver};
pub use transport::TcpTransport;
