//! TCP implementation of the core `Transport` trait.
//!
//! Each connection generation gets a fresh receive queue and a spawned
//! receiver task that owns the read half of the socket. The task only
//! decodes lines and pushes messages; it signals end-of-stream when the
//! socket closes or errors.
//!
//! Closing stops the input side first by aborting the receiver task, which
//! drops the read half, then shuts down and drops the write half. Writes
//! give up after [`WRITE_TIMEOUT`] so a peer that stops reading cannot
//! stall the driver loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ircddb_core::transport::Result;
use ircddb_core::{LineDecoder, Message, MessageQueue, Transport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;

/// Bytes read from the socket per call.
pub const READ_CHUNK: usize = 1000;

/// Longest a single message write may take.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpTransport {
    manager: ConnectionManager,
    writer: Option<OwnedWriteHalf>,
    receiver: Option<JoinHandle<()>>,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            writer: None,
            receiver: None,
            write_timeout: WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<Arc<MessageQueue>> {
        self.close().await;

        let stream = self.manager.connect().await?;
        let (read, write) = stream.into_split();

        let queue = Arc::new(MessageQueue::new());
        let task_queue = Arc::clone(&queue);
        self.receiver = Some(tokio::spawn(async move {
            receive_loop(read, task_queue).await;
        }));
        self.writer = Some(write);
        Ok(queue)
    }

    async fn write(&mut self, message: &Message) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(TransportError::Closed)?;
        match tokio::time::timeout(self.write_timeout, writer.write_all(&message.to_wire())).await
        {
            Ok(result) => result.map_err(|e| TransportError::Write(e.to_string())),
            Err(_) => Err(TransportError::Write(format!(
                "timed out after {:?}",
                self.write_timeout
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(task) = self.receiver.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Socket shutdown: {}", e);
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.receiver.take() {
            task.abort();
        }
    }
}

/// Read until EOF or error, decoding lines into `queue`.
async fn receive_loop(mut read: OwnedReadHalf, queue: Arc<MessageQueue>) {
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        match read.read(&mut buf).await {
            Ok(0) => {
                debug!("Server closed the connection");
                break;
            }
            Ok(n) => {
                for message in decoder.feed(&buf[..n]) {
                    queue.put(message);
                }
            }
            Err(e) => {
                warn!("Socket read failed: {}", e);
                break;
            }
        }
    }

    queue.signal_end_of_stream();
}
