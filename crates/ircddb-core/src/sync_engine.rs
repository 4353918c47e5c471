//! SyncEngine: source election, table snapshots and live row updates.
//!
//! The engine ticks once per second. It only ever talks to the network
//! through the [`SendQueueSlot`]; an empty slot means "not connected" and
//! sends are dropped.
//!
//! ```text
//! AwaitingConnectivity → Electing → NextTable → RequestSnapshot → AwaitingSnapshot
//!          ↑                            ↑________________|________________|
//!          |                            ↓
//!          └──────── (reset) ────── EnterSteady → Steady
//! ```
//!
//! Session events (joins, messages, disconnects) are fed in with
//! [`SyncEngine::handle_event`] between ticks.

use crate::command::{
    AppCommand, ChannelBody, CommandError, parse_channel, parse_query, table_tag,
};
use crate::config::EngineConfig;
use crate::ext_app::{DatabaseObject, ExtApp, UpdateResult, should_rebroadcast};
use crate::membership::{Membership, is_admin_nick, is_source_nick};
use crate::message::Message;
use crate::privacy::{self, PRIVACY_TABLE};
use crate::queue::SendQueueSlot;
use crate::session::SessionEvent;
use crate::tables::{RowFields, format_timestamp, is_date, parse_timestamp};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ticks to find an operator sync source.
pub const ELECTION_TICKS: u32 = 200;
/// Ticks to wait for the end of one table snapshot.
pub const SNAPSHOT_TICKS: u32 = 900;
/// Ticks without a channel heartbeat before resyncing.
pub const SILENCE_TICKS: u32 = 600;
/// Ticks between `QUIT_NOW` and process exit.
pub const EXIT_TICKS: u32 = 3;
/// Rows served per `SENDLIST` answer.
pub const SENDLIST_BATCH: usize = 30;

/// Password property, never echoed back.
const PASSWORD_PROPERTY: &str = "irc_password";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingConnectivity,
    Electing,
    NextTable,
    RequestSnapshot,
    AwaitingSnapshot,
    EnterSteady,
    Steady,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The process should exit now
    Exit,
}

pub struct SyncEngine<A: ExtApp> {
    config: EngineConfig,
    app: A,
    membership: Arc<Membership>,
    slot: SendQueueSlot,
    state: EngineState,
    timer: u32,
    channel_timeout: u32,
    nick: String,
    source: Option<String>,
    /// Tables still to request; the next one is `pending_tables - 1`
    pending_tables: usize,
    table: usize,
    accept_public_updates: bool,
    public_updates: Vec<VecDeque<Vec<String>>>,
    startup: DateTime<Utc>,
    reason: String,
    /// We sent QUIT ourselves; keep our reason over the teardown one
    quit_sent: bool,
    topic: Option<String>,
}

impl<A: ExtApp> SyncEngine<A> {
    pub fn new(
        config: EngineConfig,
        app: A,
        membership: Arc<Membership>,
        slot: SendQueueSlot,
    ) -> Self {
        let num_tables = config.num_tables();
        Self {
            config,
            app,
            membership,
            slot,
            state: EngineState::AwaitingConnectivity,
            timer: 0,
            channel_timeout: 0,
            nick: String::new(),
            source: None,
            pending_tables: 0,
            table: 0,
            accept_public_updates: false,
            public_updates: vec![VecDeque::new(); num_tables],
            startup: Utc::now(),
            reason: "startup".to_string(),
            quit_sent: false,
            topic: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Reason announced after the next election.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn into_app(self) -> A {
        self.app
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn startup_time(&self) -> DateTime<Utc> {
        self.startup
    }

    /// Channel updates held back until the snapshot phase is done.
    pub fn buffered_updates(&self, table: usize) -> usize {
        self.public_updates.get(table).map_or(0, VecDeque::len)
    }

    // ==================== Tick ====================

    pub fn tick(&mut self) -> TickOutcome {
        self.timer = self.timer.saturating_sub(1);
        self.channel_timeout = self.channel_timeout.saturating_add(1);

        if self.state == EngineState::Exiting {
            return if self.timer == 0 {
                TickOutcome::Exit
            } else {
                TickOutcome::Continue
            };
        }

        if !self.slot.is_connected() {
            if self.state != EngineState::AwaitingConnectivity {
                debug!("engine: send queue gone in state {:?}", self.state);
                self.go_idle();
            }
            return TickOutcome::Continue;
        }

        match self.state {
            EngineState::AwaitingConnectivity => {
                self.state = EngineState::Electing;
                self.timer = ELECTION_TICKS;
            }
            EngineState::Electing => self.elect(),
            EngineState::NextTable => {
                if self.pending_tables == 0 {
                    self.state = EngineState::EnterSteady;
                } else {
                    self.pending_tables -= 1;
                    self.table = self.pending_tables;
                    debug!("engine: snapshot of table {}", self.table);
                    self.timer = SNAPSHOT_TICKS;
                    self.state = EngineState::RequestSnapshot;
                }
            }
            EngineState::RequestSnapshot => self.request_snapshot(),
            EngineState::AwaitingSnapshot => {
                if self.timer == 0 {
                    self.quit("timeout SENDLIST");
                    self.reset("timeout waiting for snapshot");
                }
            }
            EngineState::EnterSteady => self.enter_steady(),
            EngineState::Steady => {
                if self.channel_timeout > SILENCE_TICKS {
                    warn!("engine: no heartbeat in {} ticks", SILENCE_TICKS);
                    self.reset("timeout waiting for heartbeat");
                }
            }
            EngineState::Exiting => {}
        }
        TickOutcome::Continue
    }

    fn elect(&mut self) {
        let Some(source) = self.membership.find_source(&self.nick) else {
            if self.timer == 0 {
                self.quit("no op user with 's-' found.");
                self.reset("no operator source found");
            }
            return;
        };

        info!("engine: elected sync source {}", source.nick);
        self.app.on_elected_source_changed(&source.nick);

        let hello = format!(
            "IRCDDB {} {}",
            format_timestamp(&self.startup),
            self.reason
        );
        self.send(Message::privmsg(&source.nick, hello));
        for line in self.config.announcement.lines() {
            self.send(Message::privmsg(&source.nick, line));
        }

        self.source = Some(source.nick);
        self.pending_tables = self.config.tables_to_sync;
        self.state = EngineState::NextTable;
    }

    fn request_snapshot(&mut self) {
        if !self.app.needs_update(self.table) {
            self.state = EngineState::NextTable;
            return;
        }
        let Some(source) = self.source.clone() else {
            self.reset("no operator source found");
            return;
        };

        let since = self
            .app
            .last_entry_timestamp(self.table)
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_else(|| "DBERROR".to_string());
        self.send(Message::privmsg(
            &source,
            format!("SENDLIST{} {}", table_tag(self.table, true), since),
        ));
        self.state = EngineState::AwaitingSnapshot;
    }

    fn enter_steady(&mut self) {
        let Some(me) = self.membership.get(&self.nick) else {
            return;
        };
        // The source may have left since its LIST_END; only OP_BEG needs it
        match self.source.as_deref().and_then(|s| self.membership.get(s)) {
            Some(source) => {
                if !me.op && source.op && me.is_source_candidate() && source.is_source_candidate()
                {
                    self.send(Message::privmsg(&source.nick, "OP_BEG"));
                }
                info!("engine: in sync with {}", source.nick);
            }
            None => info!("engine: in sync, source no longer in channel"),
        }

        self.enable_public_updates();
        self.channel_timeout = 0;
        self.state = EngineState::Steady;
    }

    fn enable_public_updates(&mut self) {
        self.accept_public_updates = true;
        for table in (0..self.public_updates.len()).rev() {
            while let Some(fields) = self.public_updates[table].pop_front() {
                self.apply_public(table, &fields);
            }
        }
    }

    /// Back to awaiting connectivity, recording why.
    fn reset(&mut self, reason: &str) {
        self.reason = reason.to_string();
        self.go_idle();
    }

    fn go_idle(&mut self) {
        self.state = EngineState::AwaitingConnectivity;
        self.timer = 0;
        self.accept_public_updates = false;
        for buffer in &mut self.public_updates {
            buffer.clear();
        }
    }

    fn quit(&mut self, text: &str) {
        self.quit_sent = true;
        self.send(Message::quit(text));
    }

    fn send(&self, message: Message) {
        if !self.slot.send(message) {
            debug!("engine: not connected, message dropped");
        }
    }

    fn debug_mirror(&self, text: String) {
        if let Some(channel) = &self.config.debug_channel {
            self.send(Message::privmsg(channel, text));
        }
    }

    fn i_am_op(&self) -> bool {
        self.membership.is_operator(&self.nick)
    }

    // ==================== Events ====================

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::NickChosen(nick) => {
                self.app.on_nick_changed(&nick);
                self.nick = nick;
            }
            SessionEvent::Joined { nick, name, host } => {
                self.app.on_join(&nick, &name, &host);
                self.debug_mirror(format!("{}: LOGIN: {} {}", nick, host, name));
            }
            SessionEvent::Left { nick } => self.on_leave(&nick),
            SessionEvent::OperatorChanged { nick, op } => {
                self.app.on_operator_change(&nick, op);
            }
            SessionEvent::TopicChanged(topic) => {
                self.app.on_topic_change(&topic);
                self.topic = Some(topic);
            }
            SessionEvent::ChannelMessage { from, text } => self.on_channel(&from, &text),
            SessionEvent::DirectMessage { from, text } => self.on_query(&from, &text),
            SessionEvent::Disconnected { reason } => {
                self.app.on_membership_reset();
                if !std::mem::take(&mut self.quit_sent) {
                    self.reason = reason;
                }
                if self.state != EngineState::Exiting {
                    self.go_idle();
                }
            }
        }
    }

    fn on_leave(&mut self, nick: &str) {
        self.app.on_leave(nick);
        self.debug_mirror(format!("{}: LOGOUT", nick));

        let idle = matches!(
            self.state,
            EngineState::AwaitingConnectivity | EngineState::Exiting
        );
        if !idle && self.source.as_deref() == Some(nick) && !self.i_am_op() {
            info!("engine: sync source {} left, electing again", nick);
            self.state = EngineState::Electing;
            self.timer = ELECTION_TICKS;
            self.accept_public_updates = false;
            self.reason = format!("{} left channel", nick);
        }
    }

    fn on_channel(&mut self, from: &str, text: &str) {
        if !is_source_nick(from) {
            return;
        }
        match parse_channel(text, self.config.num_tables()) {
            Ok(ChannelBody::Row { table, fields }) => {
                if self.accept_public_updates {
                    self.apply_public(table, &fields);
                } else if let Some(buffer) = self.public_updates.get_mut(table) {
                    buffer.push_back(fields);
                }
            }
            Ok(ChannelBody::Heartbeat) => self.channel_timeout = 0,
            Ok(ChannelBody::Other) => self.app.on_channel_message(from, text),
            Err(CommandError::TableOutOfRange(t)) => debug!("engine: invalid table id {}", t),
            Err(CommandError::Empty) => {}
        }
    }

    /// Apply a channel row. Never rebroadcast.
    fn apply_public(&mut self, table: usize, fields: &[String]) {
        let tokens: Vec<&str> = fields.iter().map(String::as_str).collect();
        let Some(row) = RowFields::parse(&tokens, &self.config.tables[table]) else {
            debug!("engine: invalid channel row for table {}", table);
            return;
        };
        if let Err(e) = self
            .app
            .db_update(table, row.timestamp, &row.key, &row.value, None, None)
        {
            warn!("engine: channel update failed: {}", e);
        }
    }

    fn on_query(&mut self, from: &str, text: &str) {
        let command = match parse_query(text, self.config.num_tables()) {
            Ok(command) => command,
            Err(CommandError::TableOutOfRange(t)) => {
                debug!("engine: invalid table id {} from {}", t, from);
                return;
            }
            Err(CommandError::Empty) => return,
        };

        match command {
            AppCommand::Update { table, fields } => self.on_update(from, text, table, &fields),
            AppCommand::SendList { table, fields } => self.serve_snapshot(from, table, &fields),
            AppCommand::ListEnd => {
                if self.awaiting_snapshot_from(from) {
                    self.state = EngineState::NextTable;
                }
            }
            AppCommand::ListMore => {
                if self.awaiting_snapshot_from(from) {
                    self.state = EngineState::RequestSnapshot;
                }
            }
            AppCommand::OpBeg => self.grant_operator(from),
            AppCommand::QuitNow => {
                if self.is_admin(from) {
                    info!("engine: QUIT_NOW from {}", from);
                    self.quit(&format!("QUIT_NOW sent by {}", from));
                    self.timer = EXIT_TICKS;
                    self.state = EngineState::Exiting;
                    self.reason = "QUIT_NOW received".to_string();
                }
            }
            AppCommand::ShowProperties => {
                if self.is_admin(from) {
                    self.show_properties(from);
                }
            }
            AppCommand::Announce => self.debug_mirror(format!("{}: {}", from, text)),
            AppCommand::Unknown(_) => self.app.on_direct_message(from, text),
        }
    }

    fn awaiting_snapshot_from(&self, from: &str) -> bool {
        self.state == EngineState::AwaitingSnapshot && self.source.as_deref() == Some(from)
    }

    /// Operator peer with the admin prefix.
    fn is_admin(&self, nick: &str) -> bool {
        is_admin_nick(nick) && self.membership.is_operator(nick)
    }

    fn on_update(&mut self, from: &str, raw: &str, table: usize, fields: &[String]) {
        if !self.membership.contains(from) {
            return;
        }
        let tokens: Vec<&str> = fields.iter().map(String::as_str).collect();
        if !tokens.first().is_some_and(|t| is_date(t)) {
            return;
        }

        let result = RowFields::parse(&tokens, &self.config.tables[table]).and_then(|row| {
            self.app
                .db_update(
                    table,
                    row.timestamp,
                    &row.key,
                    &row.value,
                    Some(from),
                    Some(raw),
                )
                .inspect_err(|e| warn!("engine: update from {} failed: {}", from, e))
                .ok()
        });

        let Some(result) = result else {
            self.debug_mirror(format!("{}: UPDATE ERROR: {}", from, raw));
            return;
        };

        let i_am_op = self.i_am_op();
        if i_am_op && should_rebroadcast(&result) {
            self.broadcast_row(table, &result, &result.new_obj.value, from);
        }

        let (privacy_command, is_station) = if table == 0 {
            (
                tokens.get(4..).and_then(privacy::find_command),
                result.new_obj.key.starts_with("STN"),
            )
        } else {
            (None, false)
        };

        if let Some(command) = privacy_command {
            self.apply_privacy(command, &result, from, i_am_op);
        }

        if privacy_command.is_none() && !is_station {
            if let Some(line) = &result.modified_log_line {
                self.debug_mirror(format!("{}: UPDATE OK: {}", from, line));
            }
        }
    }

    fn apply_privacy(&mut self, command: &str, result: &UpdateResult, from: &str, i_am_op: bool) {
        let Some(flag) = privacy::flag_for(command, result.hide_from_log) else {
            return;
        };
        if !i_am_op || self.config.num_tables() <= PRIVACY_TABLE {
            return;
        }

        debug!("engine: {} sets privacy of {} to {}", from, result.new_obj.key, flag);
        self.broadcast_row(PRIVACY_TABLE, result, flag, from);

        let nick = self.nick.clone();
        if let Err(e) = self.app.db_update(
            PRIVACY_TABLE,
            result.new_obj.mod_time,
            &result.new_obj.key,
            flag,
            Some(&nick),
            None,
        ) {
            warn!("engine: privacy update failed: {}", e);
        }
    }

    /// `[t ]<date> <time> <key> <value>  (from: <nick>)` to the channel.
    fn broadcast_row(&self, table: usize, result: &UpdateResult, value: &str, from: &str) {
        let text = format!(
            "{}{} {} {}  (from: {})",
            table_tag(table, false),
            format_timestamp(&result.new_obj.mod_time),
            result.new_obj.key,
            value,
            from
        );
        self.send(Message::privmsg(&self.config.channel, text));
    }

    fn serve_snapshot(&self, to: &str, table: usize, fields: &[String]) {
        let since = match fields {
            [date, time, ..] => parse_timestamp(date, time),
            _ => None,
        };

        let mut answer = "LIST_END";
        if let Some(since) = since {
            let (rows, more) = snapshot_batch(&self.app, table, since);
            for row in &rows {
                self.send(Message::privmsg(
                    to,
                    format!(
                        "UPDATE{} {} {} {}",
                        table_tag(table, true),
                        format_timestamp(&row.mod_time),
                        row.key,
                        row.value
                    ),
                ));
            }
            if more {
                answer = "LIST_MORE";
            }
        }
        self.send(Message::privmsg(to, answer));
    }

    fn grant_operator(&self, from: &str) {
        let (Some(me), Some(other)) = (self.membership.get(&self.nick), self.membership.get(from))
        else {
            return;
        };
        if me.op && !other.op && me.is_source_candidate() && other.is_source_candidate() {
            info!("engine: granting operator to {}", other.nick);
            self.send(Message::new(
                "MODE",
                [self.config.channel.as_str(), "+o", other.nick.as_str()],
            ));
        }
    }

    fn show_properties(&self, to: &str) {
        let total = self.config.properties.len();
        for (i, (key, value)) in self.config.properties.iter().enumerate() {
            let shown = if key == PASSWORD_PROPERTY {
                "*****".to_string()
            } else {
                format!("({})", value)
            };
            self.send(Message::privmsg(
                to,
                format!("{}: ({}) {}", total - i, key, shown),
            ));
        }
    }
}

/// Rows to answer a `SENDLIST` with, and whether more follow.
///
/// A batch never ends inside a group of rows sharing one timestamp, and
/// always reaches past `since` when newer rows exist. The requester asks
/// again from its newest timestamp, so either rule broken would have it
/// receive the same batch forever.
fn snapshot_batch<A: ExtApp>(
    app: &A,
    table: usize,
    since: DateTime<Utc>,
) -> (Vec<DatabaseObject>, bool) {
    let mut limit = SENDLIST_BATCH + 1;
    loop {
        let mut rows = app.get_rows(table, since, limit);
        let complete = rows.len() < limit;
        let at_since = rows.iter().take_while(|r| r.mod_time <= since).count();
        let start = SENDLIST_BATCH.max(at_since + 1);
        let cut = (start..rows.len()).find(|&i| rows[i].mod_time != rows[i - 1].mod_time);
        match cut {
            Some(cut) => {
                rows.truncate(cut);
                return (rows, true);
            }
            None if complete => return (rows, false),
            None => limit = limit.saturating_mul(2),
        }
    }
}
