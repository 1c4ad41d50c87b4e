//! Per-connection tuning for entity sessions.

use std::env;
use std::time::Duration;

use rowbound_core::{ConfigErrorKind, Error, Result};
use rowbound_schema::MigrationMode;
use serde::{Deserialize, Serialize};

/// Cache, counting and schema-check settings shared by every session on a
/// connection.
///
/// Durations are stored in milliseconds so the struct reads and writes as
/// plain JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest table the collection cache will hold.
    pub collection_ceiling: usize,
    pub collection_expiry_ms: u64,
    pub single_expiry_ms: u64,
    /// Entry bound of the single-object cache.
    pub single_max_entries: usize,
    /// Counts at or below this are kept exact and adjusted on every typed write.
    pub exact_count_ceiling: i64,
    /// Estimates at or above this are trusted instead of running `COUNT(*)`.
    pub count_upgrade_threshold: i64,
    /// Lifetime of a count above the exact ceiling.
    pub count_ttl_ms: u64,
    /// How long a thread waits for another thread's schema check.
    pub schema_wait_ms: u64,
    pub migration: MigrationMode,
    pub hold_cache: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            collection_ceiling: 1000,
            collection_expiry_ms: 10_000,
            single_expiry_ms: 10_000,
            single_max_entries: 10_000,
            exact_count_ceiling: 1_000_000,
            count_upgrade_threshold: 100_000,
            count_ttl_ms: 600_000, // 10 minutes
            schema_wait_ms: 1_000,
            migration: MigrationMode::On,
            hold_cache: false,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the collection cache ceiling.
    pub fn collection_ceiling(mut self, rows: usize) -> Self {
        self.collection_ceiling = rows;
        self
    }

    pub fn collection_expiry(mut self, ms: u64) -> Self {
        self.collection_expiry_ms = ms;
        self
    }

    pub fn single_expiry(mut self, ms: u64) -> Self {
        self.single_expiry_ms = ms;
        self
    }

    pub fn single_max_entries(mut self, entries: usize) -> Self {
        self.single_max_entries = entries;
        self
    }

    pub fn exact_count_ceiling(mut self, rows: i64) -> Self {
        self.exact_count_ceiling = rows;
        self
    }

    pub fn count_upgrade_threshold(mut self, rows: i64) -> Self {
        self.count_upgrade_threshold = rows;
        self
    }

    pub fn count_ttl(mut self, ms: u64) -> Self {
        self.count_ttl_ms = ms;
        self
    }

    pub fn schema_wait(mut self, ms: u64) -> Self {
        self.schema_wait_ms = ms;
        self
    }

    pub fn migration(mut self, mode: MigrationMode) -> Self {
        self.migration = mode;
        self
    }

    pub fn hold_cache(mut self, hold: bool) -> Self {
        self.hold_cache = hold;
        self
    }

    pub fn collection_expiry_duration(&self) -> Duration {
        Duration::from_millis(self.collection_expiry_ms)
    }

    pub fn single_expiry_duration(&self) -> Duration {
        Duration::from_millis(self.single_expiry_ms)
    }

    pub fn count_ttl_duration(&self) -> Duration {
        Duration::from_millis(self.count_ttl_ms)
    }

    pub fn schema_wait_duration(&self) -> Duration {
        Duration::from_millis(self.schema_wait_ms)
    }

    /// Parse a JSON document. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::config(
                ConfigErrorKind::InvalidSettings,
                format!("invalid session settings: {e}"),
            )
        })
    }

    /// Defaults overlaid with any `ROWBOUND_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay(|key| env::var(key).ok())
    }

    /// Overlay values looked up by `ROWBOUND_*` key.
    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("ROWBOUND_COLLECTION_CEILING") {
            self.collection_ceiling = parse_setting("ROWBOUND_COLLECTION_CEILING", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_COLLECTION_EXPIRY_MS") {
            self.collection_expiry_ms = parse_setting("ROWBOUND_COLLECTION_EXPIRY_MS", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_SINGLE_EXPIRY_MS") {
            self.single_expiry_ms = parse_setting("ROWBOUND_SINGLE_EXPIRY_MS", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_SINGLE_MAX_ENTRIES") {
            self.single_max_entries = parse_setting("ROWBOUND_SINGLE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_EXACT_COUNT_CEILING") {
            self.exact_count_ceiling = parse_setting("ROWBOUND_EXACT_COUNT_CEILING", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_COUNT_UPGRADE_THRESHOLD") {
            self.count_upgrade_threshold = parse_setting("ROWBOUND_COUNT_UPGRADE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_COUNT_TTL_MS") {
            self.count_ttl_ms = parse_setting("ROWBOUND_COUNT_TTL_MS", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_SCHEMA_WAIT_MS") {
            self.schema_wait_ms = parse_setting("ROWBOUND_SCHEMA_WAIT_MS", &v)?;
        }
        if let Some(v) = lookup("ROWBOUND_MIGRATION") {
            self.migration = MigrationMode::parse(&v).ok_or_else(|| {
                Error::config(
                    ConfigErrorKind::InvalidSettings,
                    format!("ROWBOUND_MIGRATION must be one of off, read_only, on, full (got {v:?})"),
                )
            })?;
        }
        if let Some(v) = lookup("ROWBOUND_HOLD_CACHE") {
            self.hold_cache = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(Error::config(
                        ConfigErrorKind::InvalidSettings,
                        format!("ROWBOUND_HOLD_CACHE must be a boolean (got {v:?})"),
                    ));
                }
            };
        }
        Ok(self)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        Error::config(
            ConfigErrorKind::InvalidSettings,
            format!("{key} must be a number (got {raw:?})"),
        )
    })
}
