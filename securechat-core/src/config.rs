//! Runtime configuration from environment variables (and `.env`).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_DB_PATH: &str = "securechat.db";
const DEFAULT_BACKUP_DIR: &str = "backups";
const DEFAULT_STORAGE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite database holding decrypted history.
    pub db_path: PathBuf,
    /// Directory used by the filesystem backup storage.
    pub backup_dir: PathBuf,
    /// Bound on each backup upload/download.
    pub storage_timeout: Duration,
    /// Daily-rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            storage_timeout: Duration::from_secs(DEFAULT_STORAGE_TIMEOUT_SECS),
            log_dir: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let storage_timeout = match lookup("SECURECHAT_STORAGE_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "SECURECHAT_STORAGE_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => defaults.storage_timeout,
        };

        Ok(Self {
            db_path: lookup("SECURECHAT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            backup_dir: lookup("SECURECHAT_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            storage_timeout,
            log_dir: lookup("SECURECHAT_LOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            log_filter: lookup("SECURECHAT_LOG")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_filter),
        })
    }
}
