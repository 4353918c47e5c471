//! SessionProtocol: IRC handshake, channel join, keep-alive and membership.
//!
//! Driven once per tick by the connection lifecycle. Each call drains the
//! receive queue, updates [`Membership`], then runs the action of the current
//! state. Handshake steps are bounded by the state timer; an expired timer is
//! a [`SessionError`] and the lifecycle tears the connection down.
//!
//! ```text
//! Register → AwaitNickAck ⇄ NickCollision
//!              ↓
//!          AwaitWelcome → JoinChannel → AwaitJoin → [JoinDebug → AwaitDebugJoin]
//!                                                        ↓
//!                                   RequestMembers → Ready ⇄ AwaitPong
//! ```

use crate::config::SessionConfig;
use crate::membership::Membership;
use crate::message::Message;
use crate::queue::{MessageQueue, SendQueueSlot};
use rand::seq::IndexedRandom;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ticks to wait for a nick-in-use reply before registering.
pub const NICK_ACK_TICKS: u32 = 10;
/// Ticks to back off after a nick collision.
pub const COLLISION_COOLDOWN_TICKS: u32 = 10;
/// Ticks to wait for the server welcome.
pub const LOGIN_TICKS: u32 = 30;
/// Ticks to wait for our own JOIN echo.
pub const JOIN_TICKS: u32 = 30;
/// Idle ticks before a keep-alive ping.
pub const PING_IDLE_TICKS: u32 = 60;
/// Ticks to wait for the matching pong.
pub const PONG_TICKS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no welcome from server")]
    LoginTimeout,

    #[error("timeout joining {0}")]
    JoinTimeout(String),

    #[error("no debug channel configured")]
    MissingDebugChannel,

    #[error("no pong from server")]
    PongTimeout,

    #[error("kicked from {0}")]
    Kicked(String),
}

/// Events for the sync engine, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    NickChosen(String),
    Joined { nick: String, name: String, host: String },
    Left { nick: String },
    OperatorChanged { nick: String, op: bool },
    TopicChanged(String),
    ChannelMessage { from: String, text: String },
    DirectMessage { from: String, text: String },
    /// Connection generation ended, membership is already cleared
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Register,
    AwaitNickAck,
    NickCollision,
    AwaitWelcome,
    JoinChannel,
    AwaitJoin,
    JoinDebug,
    AwaitDebugJoin,
    RequestMembers,
    Ready,
    AwaitPong,
}

pub struct SessionProtocol {
    config: SessionConfig,
    membership: Arc<Membership>,
    slot: SendQueueSlot,
    state: SessionState,
    timer: u32,
    nick: String,
}

impl SessionProtocol {
    pub fn new(config: SessionConfig, membership: Arc<Membership>, slot: SendQueueSlot) -> Self {
        let nick = config.nicks.first().cloned().unwrap_or_default();
        Self {
            config,
            membership,
            slot,
            state: SessionState::Idle,
            timer: 0,
            nick,
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The send queue has been handed to the application.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::AwaitPong)
    }

    /// Start a fresh handshake (true) or go idle (false).
    ///
    /// Starting picks a random candidate nick and reports it.
    pub fn set_network_ready(&mut self, ready: bool) -> Option<SessionEvent> {
        if !ready {
            self.state = SessionState::Idle;
            return None;
        }
        if self.state != SessionState::Idle {
            warn!("session: network ready while in state {:?}", self.state);
        }
        self.state = SessionState::Register;
        self.timer = 0;
        Some(self.choose_nick(false))
    }

    /// Pick a candidate nick. After a collision the current one is avoided.
    fn choose_nick(&mut self, avoid_current: bool) -> SessionEvent {
        let candidates: Vec<&String> = self
            .config
            .nicks
            .iter()
            .filter(|n| !avoid_current || self.config.nicks.len() == 1 || **n != self.nick)
            .collect();

        if let Some(nick) = candidates.choose(&mut rand::rng()) {
            self.nick = (*nick).clone();
        }
        debug!("session: using nick {}", self.nick);
        SessionEvent::NickChosen(self.nick.clone())
    }

    /// Run one tick: consume `recv`, produce onto `send`, collect events.
    pub fn process(
        &mut self,
        recv: &MessageQueue,
        send: &Arc<MessageQueue>,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        self.timer = self.timer.saturating_sub(1);

        while let Some(m) = recv.try_get() {
            if self.config.trace_traffic {
                debug!("R {}", m.bracketed());
            }
            self.handle(&m, send, events)?;
        }

        self.step(send, events)
    }

    fn handle(
        &mut self,
        m: &Message,
        send: &MessageQueue,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        let channel = self.config.channel.as_str();

        match m.command.as_str() {
            "004" => {
                if self.state == SessionState::AwaitWelcome {
                    self.state = SessionState::JoinChannel;
                }
            }
            "PING" => {
                send.put(Message::new("PONG", m.params.iter().take(1).cloned()));
            }
            "PONG" => {
                if self.state == SessionState::AwaitPong {
                    self.timer = PING_IDLE_TICKS;
                    self.state = SessionState::Ready;
                }
            }
            "JOIN" => {
                let target = m.param(0);
                let own = m.prefix_nick() == self.nick;

                if target == Some(channel) {
                    if own && self.state == SessionState::AwaitJoin {
                        self.state = if self.config.debug_channel.is_some() {
                            SessionState::JoinDebug
                        } else {
                            SessionState::RequestMembers
                        };
                    } else {
                        self.join(m.prefix_nick(), m.prefix_name(), m.prefix_host(), events);
                    }
                }

                if target.is_some()
                    && target == self.config.debug_channel.as_deref()
                    && own
                    && self.state == SessionState::AwaitDebugJoin
                {
                    self.state = SessionState::RequestMembers;
                }
            }
            "PART" => {
                if m.param(0) == Some(channel) {
                    self.leave(m.prefix_nick(), events);
                }
            }
            "KICK" => {
                if let (Some(target), Some(victim)) = (m.param(0), m.param(1)) {
                    if target == channel {
                        if victim == self.nick {
                            return Err(SessionError::Kicked(channel.to_string()));
                        }
                        self.leave(victim, events);
                    }
                }
            }
            "QUIT" => self.leave(m.prefix_nick(), events),
            "MODE" => {
                if m.params.len() >= 3 && m.param(0) == Some(channel) {
                    self.mode_change(m, events);
                }
            }
            "PRIVMSG" => {
                if m.params.len() == 2 {
                    let from = m.prefix_nick().to_string();
                    let text = m.params[1].clone();
                    if m.params[0] == channel {
                        events.push(SessionEvent::ChannelMessage { from, text });
                    } else if m.params[0] == self.nick {
                        events.push(SessionEvent::DirectMessage { from, text });
                    }
                }
            }
            "352" => {
                // WHO reply: me channel user host server nick flags :hops realname
                if m.params.len() >= 7
                    && m.params[0] == self.nick
                    && m.params[1] == channel
                {
                    let nick = m.params[5].as_str();
                    self.join(nick, &m.params[2], &m.params[3], events);
                    self.set_operator(nick, m.params[6] == "H@", events);
                }
            }
            "433" => {
                if self.state == SessionState::AwaitNickAck {
                    info!("session: nick {} in use", self.nick);
                    self.state = SessionState::NickCollision;
                    self.timer = COLLISION_COOLDOWN_TICKS;
                }
            }
            "332" => {
                if m.params.len() == 3 && m.params[1] == channel {
                    events.push(SessionEvent::TopicChanged(m.params[2].clone()));
                }
            }
            "TOPIC" => {
                if m.params.len() == 2 && m.params[0] == channel {
                    events.push(SessionEvent::TopicChanged(m.params[1].clone()));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// `MODE <channel> <±modes> <arg>...`: only `o` flags are tracked.
    fn mode_change(&self, m: &Message, events: &mut Vec<SessionEvent>) {
        let modes: Vec<char> = m.params[1].chars().collect();
        let op = match modes.first() {
            Some('+') => true,
            Some('-') => false,
            _ => return,
        };
        for (i, flag) in modes.iter().enumerate().skip(1) {
            let Some(nick) = m.param(i + 1) else { break };
            if *flag == 'o' {
                self.set_operator(nick, op, events);
            }
        }
    }

    fn join(&self, nick: &str, name: &str, host: &str, events: &mut Vec<SessionEvent>) {
        self.membership.join(nick, name, host);
        events.push(SessionEvent::Joined {
            nick: nick.to_string(),
            name: name.to_string(),
            host: host.to_string(),
        });
    }

    fn leave(&self, nick: &str, events: &mut Vec<SessionEvent>) {
        if self.membership.leave(nick).is_some() {
            events.push(SessionEvent::Left {
                nick: nick.to_string(),
            });
        }
    }

    fn set_operator(&self, nick: &str, op: bool, events: &mut Vec<SessionEvent>) {
        if self.membership.set_operator(nick, op) {
            events.push(SessionEvent::OperatorChanged {
                nick: nick.to_string(),
                op,
            });
        }
    }

    fn step(
        &mut self,
        send: &Arc<MessageQueue>,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Register => {
                send.put(Message::new("PASS", [self.config.password.as_str()]));
                send.put(Message::new("NICK", [self.nick.as_str()]));
                self.timer = NICK_ACK_TICKS;
                self.state = SessionState::AwaitNickAck;
            }
            SessionState::AwaitNickAck => {
                if self.timer == 0 {
                    send.put(Message::new(
                        "USER",
                        [
                            self.config.name.as_str(),
                            "0",
                            "*",
                            self.config.version.as_str(),
                        ],
                    ));
                    self.timer = LOGIN_TICKS;
                    self.state = SessionState::AwaitWelcome;
                }
            }
            SessionState::NickCollision => {
                if self.timer == 0 {
                    events.push(self.choose_nick(true));
                    send.put(Message::new("NICK", [self.nick.as_str()]));
                    self.timer = NICK_ACK_TICKS;
                    self.state = SessionState::AwaitNickAck;
                }
            }
            SessionState::AwaitWelcome => {
                if self.timer == 0 {
                    return Err(SessionError::LoginTimeout);
                }
            }
            SessionState::JoinChannel => {
                send.put(Message::new("JOIN", [self.config.channel.as_str()]));
                self.timer = JOIN_TICKS;
                self.state = SessionState::AwaitJoin;
            }
            SessionState::AwaitJoin => {
                if self.timer == 0 {
                    return Err(SessionError::JoinTimeout(self.config.channel.clone()));
                }
            }
            SessionState::JoinDebug => {
                let debug_channel = self
                    .config
                    .debug_channel
                    .as_deref()
                    .ok_or(SessionError::MissingDebugChannel)?;
                send.put(Message::new("JOIN", [debug_channel]));
                self.timer = JOIN_TICKS;
                self.state = SessionState::AwaitDebugJoin;
            }
            SessionState::AwaitDebugJoin => {
                if self.timer == 0 {
                    let debug_channel = self.config.debug_channel.clone().unwrap_or_default();
                    return Err(SessionError::JoinTimeout(debug_channel));
                }
            }
            SessionState::RequestMembers => {
                send.put(Message::new("WHO", [self.config.channel.as_str(), "*"]));
                self.timer = PING_IDLE_TICKS;
                self.state = SessionState::Ready;
                info!("session: ready as {} in {}", self.nick, self.config.channel);
                self.slot.publish(Arc::clone(send));
            }
            SessionState::Ready => {
                if self.timer == 0 {
                    send.put(Message::new("PING", [self.nick.as_str()]));
                    self.timer = PONG_TICKS;
                    self.state = SessionState::AwaitPong;
                }
            }
            SessionState::AwaitPong => {
                if self.timer == 0 {
                    return Err(SessionError::PongTimeout);
                }
            }
        }
        Ok(())
    }
}
