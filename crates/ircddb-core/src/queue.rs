//! Message queues shared between the receiver task and the driving loop.
//!
//! A [`MessageQueue`] is an unbounded FIFO with a sticky end-of-stream flag.
//! One instance belongs to exactly one connection generation and is never
//! reused after a reconnect.
//!
//! A [`SendQueueSlot`] publishes the live send queue to the application.
//! The slot holds either the queue of the current connection or nothing;
//! "nothing" means "not connected, suspend all sends".

use crate::message::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Thread-safe FIFO of decoded messages.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: Mutex<VecDeque<Message>>,
    end_of_stream: AtomicBool,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Never fails, preserves arrival order.
    pub fn put(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
    }

    /// Take the oldest message, if any.
    pub fn try_get(&self) -> Option<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Take every queued message in order.
    pub fn drain(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the producer side as finished. Cannot be undone.
    pub fn signal_end_of_stream(&self) {
        self.end_of_stream.store(true, Ordering::Release);
    }

    /// True once [`signal_end_of_stream`](Self::signal_end_of_stream) was called.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream.load(Ordering::Acquire)
    }
}

/// Shared handle to the send queue of the current connection generation.
///
/// Cloning the slot shares it. The queue reference inside is replaced as a
/// whole, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct SendQueueSlot {
    inner: Arc<RwLock<Option<Arc<MessageQueue>>>>,
}

impl SendQueueSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the queue of a freshly bootstrapped session.
    pub fn publish(&self, queue: Arc<MessageQueue>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(queue);
    }

    /// Withdraw the queue on disconnect.
    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Current queue, or `None` while disconnected.
    pub fn current(&self) -> Option<Arc<MessageQueue>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some()
    }

    /// Queue a message on the live connection.
    ///
    /// Returns false (and drops the message) while disconnected.
    pub fn send(&self, message: Message) -> bool {
        match self.current() {
            Some(queue) => {
                queue.put(message);
                true
            }
            None => false,
        }
    }
}
