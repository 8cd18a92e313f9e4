//! Watcher configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use fsmon_core::MonitorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Which backend the engine should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Probe backends in priority order
    #[default]
    Auto,
    /// OS event push (inotify / FSEvents / ReadDirectoryChangesW)
    Native,
    /// Periodic snapshot diff
    Diff,
    /// Periodic stat of a single file
    Poll,
}

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for MonitorError {
    fn from(err: ConfigError) -> Self {
        MonitorError::Config(err.to_string())
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiet window for CHANGED coalescing, applied to new monitors (default: 800ms)
    pub rate_limit_ms: u64,

    /// How long an unmatched delete/move-out waits for its partner (default: 100ms)
    pub move_pair_window_ms: u64,

    /// Upper bound on buffered unmatched moves per watch (default: 256)
    pub max_pending_moves: usize,

    /// Snapshot interval of the diff backend (default: 250ms)
    pub diff_interval_ms: u64,

    /// Stat interval of the poll backend (default: 1s)
    pub poll_interval_ms: u64,

    /// Device probe interval for WATCH_MOUNTS on the native backend (default: 1s)
    pub mount_poll_interval_ms: u64,

    /// Backend selection
    pub backend: BackendPreference,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 800,
            move_pair_window_ms: 100,
            max_pending_moves: 256,
            diff_interval_ms: 250,
            poll_interval_ms: 1_000,
            mount_poll_interval_ms: 1_000,
            backend: BackendPreference::Auto,
        }
    }
}

impl WatcherConfig {
    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: WatcherConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject intervals that would spin
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("diff_interval_ms", self.diff_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("mount_poll_interval_ms", self.mount_poll_interval_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.max_pending_moves == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pending_moves",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    pub fn move_pair_window(&self) -> Duration {
        Duration::from_millis(self.move_pair_window_ms)
    }

    pub fn diff_interval(&self) -> Duration {
        Duration::from_millis(self.diff_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_interval_ms)
    }
}
