//! Config file resolution for the CLI
//!
//! `--config FILE` wins; otherwise `$XDG_CONFIG_HOME/fsmon/config.toml` is read
//! when it exists. Command-line flags are applied on top.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use watcher::{BackendPreference, WatcherConfig};

/// `--backend` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Auto,
    Native,
    Diff,
    Poll,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Native => BackendPreference::Native,
            BackendArg::Diff => BackendPreference::Diff,
            BackendArg::Poll => BackendPreference::Poll,
        }
    }
}

/// Flags that override file values
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub backend: Option<BackendArg>,
    pub rate_limit_ms: Option<u64>,
}

/// Per-user config location
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fsmon").join("config.toml"))
}

/// Resolve the effective configuration
pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<WatcherConfig> {
    let mut config = match explicit {
        Some(path) => WatcherConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match config_file_path().filter(|path| path.is_file()) {
            Some(path) => {
                tracing::debug!("Using config {}", path.display());
                WatcherConfig::load(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => WatcherConfig::default(),
        },
    };

    if let Some(backend) = overrides.backend {
        config.backend = backend.into();
    }
    if let Some(ms) = overrides.rate_limit_ms {
        config.rate_limit_ms = ms;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "rate_limit_ms = 300\nbackend = \"poll\"\ndiff_interval_ms = 50\n").unwrap();

        let config = load(
            Some(&path),
            Overrides {
                backend: Some(BackendArg::Diff),
                rate_limit_ms: None,
            },
        )
        .unwrap();

        assert_eq!(config.backend, BackendPreference::Diff);
        assert_eq!(config.rate_limit_ms, 300);
        assert_eq!(config.diff_interval_ms, 50);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = load(Some(&temp.path().join("absent.toml")), Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "poll_interval_ms = 0\n").unwrap();

        assert!(load(Some(&path), Overrides::default()).is_err());
    }
}
