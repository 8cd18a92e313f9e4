//! Unmount detection for WATCH_MOUNTS
//!
//! Records the device holding the watched path at start. When the path (or
//! its nearest surviving ancestor) later resolves to a different device, the
//! mount went away. A plain delete leaves the ancestor on the same device.

use std::path::{Path, PathBuf};

/// Device sampler for one watched path
#[derive(Debug)]
pub struct MountProbe {
    path: PathBuf,
    device: Option<u64>,
    fired: bool,
}

impl MountProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let device = device_of_nearest(&path);
        Self {
            path,
            device,
            fired: false,
        }
    }

    /// Probe with a recorded device instead of sampling one
    pub fn with_device(path: impl Into<PathBuf>, device: Option<u64>) -> Self {
        Self {
            path: path.into(),
            device,
            fired: false,
        }
    }

    /// Sample the device again
    ///
    /// Returns true exactly once, the first time the device is found changed.
    pub fn check(&mut self) -> bool {
        if self.fired {
            return false;
        }
        let Some(recorded) = self.device else {
            return false;
        };
        let current = device_of_nearest(&self.path);
        if current != Some(recorded) {
            tracing::info!(
                "Mount holding {} went away (device {} -> {:?})",
                self.path.display(),
                recorded,
                current
            );
            self.fired = true;
            return true;
        }
        false
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn device_of_nearest(path: &Path) -> Option<u64> {
    path.ancestors().find_map(device_of)
}

#[cfg(unix)]
fn device_of(path: &Path) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| m.dev())
}

#[cfg(not(unix))]
fn device_of(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|_| 0)
}
