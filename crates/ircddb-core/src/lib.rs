//! ircddb-core: replicated key/value tables over an IRC channel.
//!
//! This crate provides:
//! - The IRC line codec and message type
//! - Connection lifecycle and session (register, join, keepalive) state machines
//! - Channel membership tracking
//! - The sync engine: source election, table snapshots, row updates
//! - The `ExtApp` storage seam and an in-memory implementation
//! - `Transport` trait abstraction for the socket side
//!
//! Every state machine is driven by `tick()` calls from the embedding
//! process; nothing in here sleeps or owns a socket.

pub mod announce;
pub mod codec;
pub mod command;
pub mod config;
pub mod ext_app;
pub mod lifecycle;
pub mod membership;
pub mod message;
pub mod privacy;
pub mod queue;
pub mod session;
pub mod store;
pub mod sync_engine;
pub mod tables;
pub mod transport;

pub use announce::{Announcement, RepeaterInfo};
pub use codec::LineDecoder;
pub use config::{ConfigError, EngineConfig, SessionConfig};
pub use ext_app::{DatabaseObject, ExtApp, StoreError, UpdateResult};
pub use lifecycle::{ConnectionLifecycle, LifecycleState};
pub use membership::{Membership, Peer};
pub use message::Message;
pub use queue::{MessageQueue, SendQueueSlot};
pub use session::{SessionError, SessionEvent, SessionProtocol, SessionState};
pub use store::InMemoryStore;
pub use sync_engine::{EngineState, SyncEngine, TickOutcome};
pub use tables::TableSchema;
pub use transport::{Transport, TransportError};
