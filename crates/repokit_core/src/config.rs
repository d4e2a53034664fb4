//! Store configuration loaded from JSON.
//!
//! # Responsibility
//! - Describe where persistent repositories keep their rows.
//! - Carry logging settings for hosts that initialize file logging.
//!
//! # Invariants
//! - Every field has a default, so `{}` is a valid configuration.
//! - `validate()` runs before any connection is opened from a config.

use crate::db::{open_db_with, DbResult};
use crate::logging::{default_log_level, init_logging, parse_level, parse_log_dir};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Busy timeout applied when a config does not override it.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid store config json: {err}"),
            Self::Invalid(message) => write!(f, "invalid store config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Backing database of persistent repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseTarget {
    /// Private in-memory database, discarded with its connection.
    #[default]
    Memory,
    /// SQLite database file, created on first open.
    File { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files; `None` leaves logging to the host.
    pub log_dir: Option<String>,
    pub database: DatabaseTarget,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            database: DatabaseTarget::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        parse_level(&self.log_level).map_err(ConfigError::Invalid)?;

        if let DatabaseTarget::File { path } = &self.database {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "database.path cannot be empty".to_string(),
                ));
            }
        }

        if let Some(log_dir) = &self.log_dir {
            parse_log_dir(log_dir).map_err(ConfigError::Invalid)?;
        }

        Ok(())
    }

    /// Opens and migrates the configured database.
    pub fn open_connection(&self) -> DbResult<Connection> {
        open_db_with(self)
    }

    /// Starts file logging when `log_dir` is set; no-op otherwise.
    pub fn init_logging(&self) -> Result<(), String> {
        match &self.log_dir {
            Some(log_dir) => init_logging(&self.log_level, log_dir),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DatabaseTarget, StoreConfig, DEFAULT_BUSY_TIMEOUT_MS};
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn empty_document_uses_defaults() {
        let config = StoreConfig::from_json_str("{}").unwrap();

        assert_eq!(config.database, DatabaseTarget::Memory);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn file_target_is_tagged_by_kind() {
        let raw = json!({
            "log_level": "warn",
            "database": { "kind": "file", "path": "/tmp/repokit.db" },
            "busy_timeout_ms": 250
        })
        .to_string();

        let config = StoreConfig::from_json_str(&raw).unwrap();
        assert_eq!(
            config.database,
            DatabaseTarget::File {
                path: PathBuf::from("/tmp/repokit.db")
            }
        );
        assert_eq!(config.busy_timeout_ms, 250);
    }

    #[test]
    fn unknown_level_and_empty_path_are_invalid() {
        let bad_level = json!({ "log_level": "loud" }).to_string();
        assert!(matches!(
            StoreConfig::from_json_str(&bad_level),
            Err(ConfigError::Invalid(_))
        ));

        let relative_logs = json!({ "log_dir": "logs" }).to_string();
        assert!(matches!(
            StoreConfig::from_json_str(&relative_logs),
            Err(ConfigError::Invalid(_))
        ));

        let empty_path = json!({ "database": { "kind": "file", "path": "" } }).to_string();
        assert!(matches!(
            StoreConfig::from_json_str(&empty_path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            StoreConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn memory_config_opens_a_migrated_connection() {
        let conn = StoreConfig::default().open_connection().unwrap();
        let version: u32 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, crate::db::migrations::latest_version());
    }
}
