//! Gateway configuration file.
//!
//! A JSON file where every field is optional. The result is turned into the
//! validated [`SessionConfig`] / [`EngineConfig`] pair the core crate runs on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ircddb_core::announce::{
    Announcement, HeightUnit, MODULES, ModuleFrequency, RangeUnit, RepeaterInfo,
};
use ircddb_core::tables::DEFAULT_PATTERN;
use ircddb_core::{ConfigError, EngineConfig, SessionConfig, TableSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nick suffixes tried when a repeater call is configured.
const CALL_SUFFIXES: [&str; 4] = ["-1", "-2", "-3", "-4"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_name")]
    pub irc_server_name: String,

    #[serde(default = "default_server_port")]
    pub irc_server_port: u16,

    /// Coordination channel
    #[serde(default = "default_channel")]
    pub irc_channel: String,

    /// Audit channel for human-readable summaries
    #[serde(default)]
    pub debug_channel: Option<String>,

    /// Nick used when no repeater call is set
    #[serde(default = "default_nick")]
    pub irc_nick: String,

    #[serde(default)]
    pub rptr_call: Option<String>,

    #[serde(default = "default_password")]
    pub irc_password: String,

    #[serde(default = "default_num_tables")]
    pub ddb_num_tables: usize,

    #[serde(default = "default_num_tables")]
    pub ddb_num_tables_sync: usize,

    /// Key pattern per table; missing entries use `[A-Z0-9_]{8}`
    #[serde(default)]
    pub key_patterns: Vec<String>,

    #[serde(default)]
    pub value_patterns: Vec<String>,

    /// Membership dump target
    #[serde(default)]
    pub dump_userdb_filename: Option<PathBuf>,

    #[serde(default)]
    pub repeater: RepeaterConfig,

    /// Log every wire message
    #[serde(default)]
    pub debug: bool,
}

/// Repeater metadata announced to the sync source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeaterConfig {
    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    #[serde(default)]
    pub text1: String,

    #[serde(default)]
    pub text2: String,

    /// `mile`, `meter` or `km`
    #[serde(default = "default_range_unit")]
    pub range_unit: String,

    /// `meter` or `feet`
    #[serde(default = "default_agl_unit")]
    pub agl_unit: String,

    /// Keyed by module name (`A`, `B`, ... `DD`)
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,

    #[serde(default)]
    pub info_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub freq: f64,
    #[serde(default)]
    pub duplex_shift: f64,
    #[serde(default)]
    pub range: f64,
    #[serde(default)]
    pub agl: f64,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            text1: String::new(),
            text2: String::new(),
            range_unit: default_range_unit(),
            agl_unit: default_agl_unit(),
            modules: BTreeMap::new(),
            info_url: String::new(),
        }
    }
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_server_port() -> u16 {
    9007
}

fn default_channel() -> String {
    "#chat".to_string()
}

fn default_nick() -> String {
    "guest".to_string()
}

fn default_password() -> String {
    "secret".to_string()
}

fn default_num_tables() -> usize {
    2
}

fn default_range_unit() -> String {
    "mile".to_string()
}

fn default_agl_unit() -> String {
    "meter".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            irc_server_name: default_server_name(),
            irc_server_port: default_server_port(),
            irc_channel: default_channel(),
            debug_channel: None,
            irc_nick: default_nick(),
            rptr_call: None,
            irc_password: default_password(),
            ddb_num_tables: default_num_tables(),
            ddb_num_tables_sync: default_num_tables(),
            key_patterns: Vec::new(),
            value_patterns: Vec::new(),
            dump_userdb_filename: None,
            repeater: RepeaterConfig::default(),
            debug: false,
        }
    }
}

impl Config {
    /// Load the configuration file, falling back to defaults when it is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Candidate nicks and the display name sent in `USER`.
    pub fn identity(&self) -> (Vec<String>, String) {
        match self.rptr_call.as_deref().map(str::trim) {
            Some(call) if !call.is_empty() => {
                let call = call.to_lowercase();
                let nicks = CALL_SUFFIXES
                    .iter()
                    .map(|suffix| format!("{}{}", call, suffix))
                    .collect();
                (nicks, call)
            }
            _ => {
                let nick = self.irc_nick.trim().to_lowercase();
                (vec![nick.clone()], nick)
            }
        }
    }

    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let (nicks, name) = self.identity();
        let config = SessionConfig {
            nicks,
            name,
            password: self.irc_password.clone(),
            channel: self.irc_channel.clone(),
            debug_channel: self.debug_channel.clone(),
            version: version_string(std::env::var("PACKAGE_VERSION").ok().as_deref()),
            trace_traffic: self.debug,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let tables = (0..self.ddb_num_tables)
            .map(|i| {
                TableSchema::new(
                    pattern_at(&self.key_patterns, i),
                    pattern_at(&self.value_patterns, i),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let config = EngineConfig {
            channel: self.irc_channel.clone(),
            debug_channel: self.debug_channel.clone(),
            tables,
            tables_to_sync: self.ddb_num_tables_sync,
            announcement: Announcement::from_info(&self.repeater_info()),
            properties: self.properties(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn repeater_info(&self) -> RepeaterInfo {
        let r = &self.repeater;
        let mut modules = [ModuleFrequency::default(); 8];
        for (slot, name) in modules.iter_mut().zip(MODULES) {
            if let Some(m) = r.modules.get(name) {
                *slot = ModuleFrequency {
                    frequency: m.freq,
                    duplex_shift: m.duplex_shift,
                    range: m.range,
                    antenna_height: m.agl,
                };
            }
        }

        RepeaterInfo {
            latitude: r.latitude,
            longitude: r.longitude,
            description1: r.text1.clone(),
            description2: r.text2.clone(),
            range_unit: RangeUnit::parse(&r.range_unit.trim().to_lowercase()),
            height_unit: HeightUnit::parse(&r.agl_unit.trim().to_lowercase()),
            modules,
            info_url: r.info_url.clone(),
        }
    }

    /// Flat `(key, value)` view of the file for `SHOW_PROPERTIES`.
    pub fn properties(&self) -> Vec<(String, String)> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter()
            .map(|(key, value)| {
                let shown = match value {
                    Value::String(s) => s,
                    Value::Null => "none".to_string(),
                    other => other.to_string(),
                };
                (key, shown)
            })
            .collect()
    }
}

fn pattern_at(patterns: &[String], table: usize) -> &str {
    patterns
        .get(table)
        .map(String::as_str)
        .unwrap_or(DEFAULT_PATTERN)
}

/// `ircddb:<version>[ <package version>]`
pub fn version_string(package_version: Option<&str>) -> String {
    let mut version = format!("ircddb:{}", env!("CARGO_PKG_VERSION"));
    if let Some(extra) = package_version.map(str::trim).filter(|v| !v.is_empty()) {
        version.push(' ');
        version.push_str(extra);
    }
    version
}
