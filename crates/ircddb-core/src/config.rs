//! Validated runtime configuration handed to the state machines.
//!
//! File parsing lives in the daemon; everything here is already normalized.

use crate::announce::Announcement;
use crate::tables::{MAX_TABLES, TableSchema};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Number of tables must be between 1 and {max}, got {0}", max = MAX_TABLES)]
    TableCount(usize),

    #[error("Tables to sync ({sync}) exceeds number of tables ({tables})")]
    TablesToSync { sync: usize, tables: usize },

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No candidate nicks configured")]
    NoNicks,

    #[error("Debug channel must differ from the coordination channel ({0})")]
    ChannelCollision(String),
}

/// Session (login and channel) settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Candidate nicks, at least one
    pub nicks: Vec<String>,
    /// Display name sent in `USER`
    pub name: String,
    pub password: String,
    pub channel: String,
    pub debug_channel: Option<String>,
    /// Real-name field of `USER`
    pub version: String,
    /// Log every wire message
    pub trace_traffic: bool,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nicks.is_empty() {
            return Err(ConfigError::NoNicks);
        }
        if self.debug_channel.as_deref() == Some(self.channel.as_str()) {
            return Err(ConfigError::ChannelCollision(self.channel.clone()));
        }
        Ok(())
    }
}

/// Sync engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub channel: String,
    pub debug_channel: Option<String>,
    /// One schema per table, index is the table id
    pub tables: Vec<TableSchema>,
    /// Tables `0..tables_to_sync` are requested after connecting
    pub tables_to_sync: usize,
    pub announcement: Announcement,
    /// Key/value pairs reported by `SHOW_PROPERTIES`
    pub properties: Vec<(String, String)>,
}

impl EngineConfig {
    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tables = self.tables.len();
        if tables == 0 || tables > MAX_TABLES {
            return Err(ConfigError::TableCount(tables));
        }
        if self.tables_to_sync > tables {
            return Err(ConfigError::TablesToSync {
                sync: self.tables_to_sync,
                tables,
            });
        }
        if self.debug_channel.as_deref() == Some(self.channel.as_str()) {
            return Err(ConfigError::ChannelCollision(self.channel.clone()));
        }
        Ok(())
    }
}
