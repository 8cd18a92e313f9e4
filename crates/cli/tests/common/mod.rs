//! Common utilities for integration tests

#![allow(dead_code)]

pub mod cli;

use anyhow::Result;
use std::path::Path;

/// Config tuned for short test runs, written into `dir`
///
/// Returns the path to pass as `--config`.
pub fn fast_config(dir: &Path) -> Result<std::path::PathBuf> {
    let path = dir.join("fsmon.toml");
    std::fs::write(
        &path,
        "rate_limit_ms = 200\n\
         diff_interval_ms = 25\n\
         poll_interval_ms = 25\n\
         mount_poll_interval_ms = 50\n",
    )?;
    Ok(path)
}
