//! ExtApp: the storage collaborator consumed by the sync engine.
//!
//! The engine decides *whether* to write and what to broadcast; the
//! collaborator decides *how* a row is stored and reports what changed.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown table: {0}")]
    UnknownTable(usize),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Storage error: {0}")]
    Other(String),
}

/// One row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseObject {
    pub mod_time: DateTime<Utc>,
    pub key: String,
    pub value: String,
}

impl DatabaseObject {
    pub fn new(mod_time: DateTime<Utc>, key: &str, value: &str) -> Self {
        Self {
            mod_time,
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Outcome of a write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    /// Key did not exist before this write
    pub key_was_new: bool,
    /// Row is marked private
    pub hide_from_log: bool,
    /// Human-readable line for the audit channel
    pub modified_log_line: Option<String>,
    /// Row as stored after the write
    pub new_obj: DatabaseObject,
    /// Row as stored before the write, if any
    pub old_obj: Option<DatabaseObject>,
}

/// Storage and notification hooks.
///
/// Data methods are required. Notification methods default to no-ops so a
/// collaborator only implements what it cares about.
pub trait ExtApp: Send {
    /// Apply a row. `raw` carries the full message body when one exists.
    fn db_update(
        &mut self,
        table: usize,
        mod_time: DateTime<Utc>,
        key: &str,
        value: &str,
        from: Option<&str>,
        raw: Option<&str>,
    ) -> Result<UpdateResult, StoreError>;

    /// Rows with `mod_time >= since`, oldest first, at most `max` of them.
    fn get_rows(&self, table: usize, since: DateTime<Utc>, max: usize) -> Vec<DatabaseObject>;

    /// Newest stored timestamp, `None` if unknown.
    fn last_entry_timestamp(&self, table: usize) -> Option<DateTime<Utc>>;

    /// Whether a snapshot should be requested for `table` after connecting.
    fn needs_update(&self, table: usize) -> bool;

    fn on_join(&mut self, _nick: &str, _name: &str, _host: &str) {}

    fn on_leave(&mut self, _nick: &str) {}

    fn on_operator_change(&mut self, _nick: &str, _op: bool) {}

    fn on_topic_change(&mut self, _topic: &str) {}

    fn on_membership_reset(&mut self) {}

    fn on_elected_source_changed(&mut self, _nick: &str) {}

    fn on_nick_changed(&mut self, _nick: &str) {}

    /// Non-protocol channel text from a sync source.
    fn on_channel_message(&mut self, _from: &str, _text: &str) {}

    /// Direct message with an unknown command word.
    fn on_direct_message(&mut self, _from: &str, _text: &str) {}
}

/// Quiet window for re-announcing an unchanged row.
pub const REBROADCAST_QUIET_MS: i64 = 40 * 60 * 1000;

/// Whether an accepted write should be announced in the channel.
///
/// New keys and changed values always are. An unchanged value is only
/// re-announced once its timestamp moved past the quiet window.
pub fn should_rebroadcast(result: &UpdateResult) -> bool {
    if result.key_was_new {
        return true;
    }
    match &result.old_obj {
        None => true,
        Some(old) if old.value != result.new_obj.value => true,
        Some(old) => {
            let delta = result.new_obj.mod_time - old.mod_time;
            delta.num_milliseconds() > REBROADCAST_QUIET_MS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::parse_timestamp;

    fn row(date_time: &str, key: &str, value: &str) -> DatabaseObject {
        let (d, t) = date_time.split_once(' ').unwrap();
        DatabaseObject::new(parse_timestamp(d, t).unwrap(), key, value)
    }

    fn result(old: Option<DatabaseObject>, new: DatabaseObject) -> UpdateResult {
        UpdateResult {
            key_was_new: old.is_none(),
            hide_from_log: false,
            modified_log_line: None,
            new_obj: new,
            old_obj: old,
        }
    }

    #[test]
    fn test_new_key_rebroadcasts() {
        let r = result(None, row("2024-01-01 00:00:00", "KEY0001", "VALUE001"));
        assert!(should_rebroadcast(&r));
    }

    #[test]
    fn test_same_value_within_quiet_window() {
        let r = result(
            Some(row("2024-01-01 00:00:00", "KEY0001", "VALUE001")),
            row("2024-01-01 00:39:00", "KEY0001", "VALUE001"),
        );
        assert!(!should_rebroadcast(&r));
    }

    #[test]
    fn test_same_value_exactly_forty_minutes() {
        let r = result(
            Some(row("2024-01-01 00:00:00", "KEY0001", "VALUE001")),
            row("2024-01-01 00:40:00", "KEY0001", "VALUE001"),
        );
        assert!(!should_rebroadcast(&r));
    }

    #[test]
    fn test_same_value_after_quiet_window() {
        let r = result(
            Some(row("2024-01-01 00:00:00", "KEY0001", "VALUE001")),
            row("2024-01-01 00:41:00", "KEY0001", "VALUE001"),
        );
        assert!(should_rebroadcast(&r));
    }

    #[test]
    fn test_changed_value_rebroadcasts() {
        let r = result(
            Some(row("2024-01-01 00:00:00", "KEY0001", "VALUE001")),
            row("2024-01-01 00:00:01", "KEY0001", "VALUE002"),
        );
        assert!(should_rebroadcast(&r));
    }
}
