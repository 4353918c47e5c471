//! Transport trait: the socket side of a connection generation.
//!
//! Implementations:
//! - TCP (ircddb-daemon)
//! - scripted in-memory transports in tests

use crate::message::Message;
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Resolve failed for {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Bad address count for {host}: {count}")]
    AddressCount { host: String, count: usize },

    #[error("No connection to {0}")]
    NoConnection(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Not connected")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[async_trait]
pub trait Transport: Send {
    /// Dial the server and start the receiver.
    ///
    /// Returns the receive queue of the new connection generation. The
    /// receiver signals end-of-stream on it when the socket closes.
    async fn connect(&mut self) -> Result<Arc<MessageQueue>>;

    /// Serialize and write one message.
    async fn write(&mut self, message: &Message) -> Result<()>;

    /// Stop the receiver and close the socket. Never fails.
    async fn close(&mut self);
}
