//! ConnectionLifecycle: dial, run and tear down connection generations.
//!
//! `Disconnected → Active → Disconnecting → Disconnected ...` forever. Every
//! tick either counts the state timer down or runs the state action. A
//! failed dial goes through `Disconnecting` too, so teardown is uniform.
//!
//! The lifecycle owns the [`SessionProtocol`] and is the only writer to the
//! transport.

use crate::membership::Membership;
use crate::queue::{MessageQueue, SendQueueSlot};
use crate::session::{SessionEvent, SessionProtocol};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ticks between a state change and the next action.
pub const SETTLE_TICKS: u32 = 1;
/// Ticks to wait after teardown before dialing again.
pub const BACKOFF_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Active,
    Disconnecting,
}

pub struct ConnectionLifecycle<T: Transport> {
    transport: T,
    session: SessionProtocol,
    membership: Arc<Membership>,
    slot: SendQueueSlot,
    state: LifecycleState,
    timer: u32,
    recv: Option<Arc<MessageQueue>>,
    send: Option<Arc<MessageQueue>>,
    reason: Option<String>,
}

impl<T: Transport> ConnectionLifecycle<T> {
    pub fn new(
        transport: T,
        session: SessionProtocol,
        membership: Arc<Membership>,
        slot: SendQueueSlot,
    ) -> Self {
        Self {
            transport,
            session,
            membership,
            slot,
            state: LifecycleState::Disconnected,
            timer: 0,
            recv: None,
            send: None,
            reason: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn session(&self) -> &SessionProtocol {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Advance by one tick and return the session events it produced.
    pub async fn tick(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if self.timer > 0 {
            self.timer -= 1;
            return events;
        }

        match self.state {
            LifecycleState::Disconnected => self.dial(&mut events).await,
            LifecycleState::Active => self.pump(&mut events).await,
            LifecycleState::Disconnecting => self.teardown(&mut events).await,
        }
        events
    }

    async fn dial(&mut self, events: &mut Vec<SessionEvent>) {
        info!("lifecycle: connecting");
        match self.transport.connect().await {
            Ok(recv) => {
                info!("lifecycle: connected");
                self.recv = Some(recv);
                self.send = Some(Arc::new(MessageQueue::new()));
                events.extend(self.session.set_network_ready(true));
                self.state = LifecycleState::Active;
            }
            Err(e) => {
                warn!("lifecycle: connect failed: {}", e);
                self.reason = Some(e.to_string());
                self.state = LifecycleState::Disconnecting;
            }
        }
        self.timer = SETTLE_TICKS;
    }

    async fn pump(&mut self, events: &mut Vec<SessionEvent>) {
        let (Some(recv), Some(send)) = (self.recv.clone(), self.send.clone()) else {
            self.fail("no queues".to_string());
            return;
        };

        if recv.is_end_of_stream() {
            self.fail("connection closed".to_string());
            return;
        }

        if let Err(e) = self.session.process(&recv, &send, events) {
            warn!("lifecycle: session failed: {}", e);
            self.fail(e.to_string());
            return;
        }

        let trace = self.session.config().trace_traffic;
        while let Some(m) = send.try_get() {
            if trace {
                debug!("S {}", m.bracketed());
            }
            if let Err(e) = self.transport.write(&m).await {
                warn!("lifecycle: {}", e);
                self.fail(e.to_string());
                break;
            }
        }
    }

    fn fail(&mut self, reason: String) {
        self.reason = Some(reason);
        self.timer = 0;
        self.state = LifecycleState::Disconnecting;
    }

    async fn teardown(&mut self, events: &mut Vec<SessionEvent>) {
        self.slot.clear();
        self.membership.reset();
        self.transport.close().await;

        self.recv = None;
        self.send = None;
        self.session.set_network_ready(false);

        let reason = self
            .reason
            .take()
            .unwrap_or_else(|| "disconnected".to_string());
        info!("lifecycle: disconnected ({}), retrying later", reason);
        events.push(SessionEvent::Disconnected { reason });

        self.timer = BACKOFF_TICKS;
        self.state = LifecycleState::Disconnected;
    }
}
