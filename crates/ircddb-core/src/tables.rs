//! Table schemas and row field validation.
//!
//! Every token is matched as a whole: a pattern `[A-Z0-9_]{8}` accepts
//! `KEY00001` but not `KEY000012`.

use crate::config::ConfigError;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Wire timestamp format, always UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Pattern used when a table has no configured key or value pattern.
pub const DEFAULT_PATTERN: &str = "[A-Z0-9_]{8}";

/// Maximum number of tables a deployment may configure.
pub const MAX_TABLES: usize = 10;

static DATE: LazyLock<Regex> = LazyLock::new(|| {
    anchored(r"20[0-9][0-9]-((1[0-2])|(0[1-9]))-((3[01])|([12][0-9])|(0[1-9]))")
});
static TIME: LazyLock<Regex> =
    LazyLock::new(|| anchored(r"((2[0-3])|([01][0-9])):[0-5][0-9]:[0-5][0-9]"));
static HEX_CHAR: LazyLock<Regex> = LazyLock::new(|| anchored("[0-9A-F]"));
static DEFAULT_FIELD: LazyLock<Regex> = LazyLock::new(|| anchored(DEFAULT_PATTERN));

// Built-in patterns are literals and always compile.
fn anchored(pattern: &str) -> Regex {
    match compile_anchored(pattern) {
        Ok(re) => re,
        Err(e) => unreachable!("built-in pattern {pattern}: {e}"),
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

pub fn is_date(token: &str) -> bool {
    DATE.is_match(token)
}

pub fn is_time(token: &str) -> bool {
    TIME.is_match(token)
}

/// Single uppercase hex digit.
pub fn is_hex_char(token: &str) -> bool {
    HEX_CHAR.is_match(token)
}

/// Eight characters of `[A-Z0-9_]`.
pub fn is_default_field(token: &str) -> bool {
    DEFAULT_FIELD.is_match(token)
}

/// Parse a single-digit table id token.
pub fn parse_table_digit(token: &str) -> Option<usize> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.to_digit(10).map(|d| d as usize),
        _ => None,
    }
}

/// Parse a `date time` pair that passed the lexical patterns.
///
/// Still returns `None` for impossible calendar dates such as `2024-02-30`.
pub fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    if !is_date(date) || !is_time(time) {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{} {}", date, time), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Key and value patterns of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    key: Regex,
    value: Regex,
}

impl TableSchema {
    pub fn new(key_pattern: &str, value_pattern: &str) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            compile_anchored(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            key: compile(key_pattern)?,
            value: compile(value_pattern)?,
        })
    }

    pub fn key_matches(&self, key: &str) -> bool {
        self.key.is_match(key)
    }

    pub fn value_matches(&self, value: &str) -> bool {
        self.value.is_match(value)
    }
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            key: DEFAULT_FIELD.clone(),
            value: DEFAULT_FIELD.clone(),
        }
    }
}

/// A row parsed from `<date> <time> <key> <value>` fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFields {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub value: String,
}

impl RowFields {
    /// Validate the first four tokens against `schema`.
    ///
    /// Trailing tokens are ignored here; the privacy check reads them.
    pub fn parse(tokens: &[&str], schema: &TableSchema) -> Option<Self> {
        let [date, time, key, value, ..] = tokens else {
            return None;
        };
        let timestamp = parse_timestamp(date, time)?;
        if !schema.key_matches(key) || !schema.value_matches(value) {
            return None;
        }
        Some(Self {
            timestamp,
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
