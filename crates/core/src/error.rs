//! Error taxonomy for monitors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while creating or running a monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The platform lacks the primitive this backend needs
    ///
    /// Recoverable by falling back to a lower-capability backend.
    #[error("backend '{backend}' is unsupported: {reason}")]
    BackendUnsupported {
        backend: &'static str,
        reason: String,
    },

    /// A per-process notification resource limit was hit (e.g. inotify watch cap)
    ///
    /// Surfaced as a monitor-creation failure, never retried.
    #[error("notification resources exhausted while watching {}: {reason}", path.display())]
    BackendResourceExhausted { path: PathBuf, reason: String },

    /// The directory listing could not be captured (e.g. removed mid-scan)
    ///
    /// Terminal for a running watch.
    #[error("failed to capture snapshot of {}: {source}", path.display())]
    SnapshotCaptureFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An event was in flight while its watch was cancelled
    ///
    /// Dropped silently, never shown to callers.
    #[error("watch was cancelled while an event was in flight")]
    CancelledRace,

    /// Other backend I/O failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The engine was given an invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitorError {
    pub fn unsupported(backend: &'static str, reason: impl Into<String>) -> Self {
        MonitorError::BackendUnsupported {
            backend,
            reason: reason.into(),
        }
    }

    pub fn capture(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MonitorError::SnapshotCaptureFailed {
            path: path.into(),
            source,
        }
    }

    /// Classify an I/O error raised while subscribing to `path`
    ///
    /// `ENOSPC` (inotify watch cap) and `EMFILE`/`ENFILE` map to resource exhaustion.
    pub fn from_subscribe_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.raw_os_error() {
            Some(code) if is_resource_limit(code) => MonitorError::BackendResourceExhausted {
                path,
                reason: source.to_string(),
            },
            _ => MonitorError::Io { path, source },
        }
    }

    /// Whether a lower-priority backend should be tried instead
    pub fn allows_fallback(&self) -> bool {
        matches!(self, MonitorError::BackendUnsupported { .. })
    }
}

#[cfg(unix)]
fn is_resource_limit(code: i32) -> bool {
    // ENOSPC, EMFILE, ENFILE
    matches!(code, 28 | 24 | 23)
}

#[cfg(not(unix))]
fn is_resource_limit(_code: i32) -> bool {
    false
}
