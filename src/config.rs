//! Database configuration.
//!
//! Supports:
//! - Flattening into a host application's clap CLI
//! - Environment variable overrides
//! - Loading from a host's own config file via serde
//! - Sensible defaults for quick start

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How `save_by_key` writes records whose natural key is not yet persisted.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdditionMode {
    /// Strict `INSERT`. A unique-constraint collision fails the whole batch.
    #[default]
    Insert,
    /// Upsert through `save`: a stale primary key on an addition updates that
    /// row instead of failing.
    Save,
}

/// Options for opening a [`Database`](crate::Database).
#[derive(Args, Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[arg(long = "db-path", env = "ROWSYNC_DB_PATH", default_value = "./data/rowsync.db")]
    pub path: PathBuf,

    /// Size of the write channel (backpressure control)
    #[arg(long, env = "ROWSYNC_WRITE_CHANNEL_SIZE", default_value_t = 256)]
    pub write_channel_size: usize,

    /// Size of the reader connection pool
    #[arg(long, env = "ROWSYNC_READER_POOL_SIZE", default_value_t = 4)]
    pub reader_pool_size: u32,

    /// Size of the change notification channel
    #[arg(long, env = "ROWSYNC_NOTIFY_CHANNEL_SIZE", default_value_t = 1024)]
    pub notify_channel_size: usize,

    /// SQLite busy timeout in milliseconds
    #[arg(long, env = "ROWSYNC_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// Write mode for keyed-save additions
    #[arg(long, env = "ROWSYNC_ADDITION_MODE", value_enum, default_value_t = AdditionMode::Insert)]
    pub addition_mode: AdditionMode,
}

impl DatabaseConfig {
    /// Default configuration pointing at the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reader_pool_size(mut self, size: u32) -> Self {
        self.reader_pool_size = size;
        self
    }

    #[must_use]
    pub fn with_addition_mode(mut self, mode: AdditionMode) -> Self {
        self.addition_mode = mode;
        self
    }

    #[must_use]
    pub fn with_notify_channel_size(mut self, size: usize) -> Self {
        self.notify_channel_size = size;
        self
    }

    /// Create a small configuration for testing.
    #[cfg(test)]
    pub fn test_config(path: PathBuf) -> Self {
        Self {
            path,
            write_channel_size: 16,
            reader_pool_size: 2,
            notify_channel_size: 64,
            busy_timeout_ms: 1000,
            addition_mode: AdditionMode::Insert,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rowsync.db"),
            write_channel_size: 256,
            reader_pool_size: 4,
            notify_channel_size: 1024,
            busy_timeout_ms: 5000,
            addition_mode: AdditionMode::Insert,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct HostCli {
        #[command(flatten)]
        db: DatabaseConfig,
    }

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.reader_pool_size, 4);
        assert_eq!(config.addition_mode, AdditionMode::Insert);
        assert_eq!(config.path, PathBuf::from("./data/rowsync.db"));
    }

    #[test]
    fn test_flatten_into_host_cli() {
        let cli = HostCli::try_parse_from([
            "host",
            "--db-path",
            "/tmp/app.db",
            "--reader-pool-size",
            "8",
            "--addition-mode",
            "save",
        ])
        .unwrap();
        assert_eq!(cli.db.path, PathBuf::from("/tmp/app.db"));
        assert_eq!(cli.db.reader_pool_size, 8);
        assert_eq!(cli.db.addition_mode, AdditionMode::Save);
        assert_eq!(cli.db.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{"path": "app.db", "addition_mode": "save"}"#).unwrap();
        assert_eq!(config.path, PathBuf::from("app.db"));
        assert_eq!(config.addition_mode, AdditionMode::Save);
        assert_eq!(config.write_channel_size, 256);
    }
}
