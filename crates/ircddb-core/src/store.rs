//! In-memory ExtApp implementation.
//!
//! Good enough for a gateway that only mirrors the shared tables, and for
//! tests. Rows never expire.

use crate::ext_app::{DatabaseObject, ExtApp, StoreError, UpdateResult};
use crate::privacy::{FLAG_HIDDEN, PRIVACY_TABLE};
use crate::tables::format_timestamp;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct InMemoryStore {
    tables: Vec<BTreeMap<String, DatabaseObject>>,
    source: Option<String>,
    topic: Option<String>,
}

impl InMemoryStore {
    pub fn new(num_tables: usize) -> Self {
        Self {
            tables: vec![BTreeMap::new(); num_tables],
            source: None,
            topic: None,
        }
    }

    pub fn get(&self, table: usize, key: &str) -> Option<&DatabaseObject> {
        self.tables.get(table)?.get(key)
    }

    pub fn len(&self, table: usize) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    /// Nick of the currently elected sync source, as last reported.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    fn is_hidden(&self, key: &str) -> bool {
        self.get(PRIVACY_TABLE, key)
            .is_some_and(|flag| flag.value == FLAG_HIDDEN)
    }
}

/// Reported for empty tables so a snapshot request starts from the beginning.
fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl ExtApp for InMemoryStore {
    fn db_update(
        &mut self,
        table: usize,
        mod_time: DateTime<Utc>,
        key: &str,
        value: &str,
        from: Option<&str>,
        _raw: Option<&str>,
    ) -> Result<UpdateResult, StoreError> {
        let hide_from_log = self.is_hidden(key);
        let rows = self
            .tables
            .get_mut(table)
            .ok_or(StoreError::UnknownTable(table))?;

        let old_obj = rows.get(key).cloned();
        let new_obj = match &old_obj {
            // Older data never replaces newer data
            Some(existing) if existing.mod_time > mod_time => existing.clone(),
            _ => {
                let row = DatabaseObject::new(mod_time, key, value);
                rows.insert(key.to_string(), row.clone());
                row
            }
        };

        debug!(
            "store: table {} {} = {} (from {})",
            table,
            key,
            value,
            from.unwrap_or("channel")
        );

        Ok(UpdateResult {
            key_was_new: old_obj.is_none(),
            hide_from_log,
            modified_log_line: Some(format!(
                "{} {} {}",
                format_timestamp(&new_obj.mod_time),
                new_obj.key,
                new_obj.value
            )),
            new_obj,
            old_obj,
        })
    }

    fn get_rows(&self, table: usize, since: DateTime<Utc>, max: usize) -> Vec<DatabaseObject> {
        let Some(rows) = self.tables.get(table) else {
            return Vec::new();
        };
        let mut selected: Vec<DatabaseObject> = rows
            .values()
            .filter(|row| row.mod_time >= since)
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.mod_time.cmp(&b.mod_time).then_with(|| a.key.cmp(&b.key)));
        selected.truncate(max);
        selected
    }

    fn last_entry_timestamp(&self, table: usize) -> Option<DateTime<Utc>> {
        let rows = self.tables.get(table)?;
        Some(rows.values().map(|r| r.mod_time).max().unwrap_or_else(epoch))
    }

    fn needs_update(&self, _table: usize) -> bool {
        true
    }

    fn on_membership_reset(&mut self) {
        self.source = None;
    }

    fn on_elected_source_changed(&mut self, nick: &str) {
        info!("store: sync source is now {}", nick);
        self.source = Some(nick.to_string());
    }

    fn on_topic_change(&mut self, topic: &str) {
        self.topic = Some(topic.to_string());
    }
}
