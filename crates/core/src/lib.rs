//! Core data model for fsmon
//!
//! This crate provides:
//! - Directory snapshots (name, inode, generation) captured from one full listing
//! - The snapshot diff engine that turns two snapshots into semantic changes
//! - The event vocabulary shared by every backend (`EventKind`, `RawEvent`, `WatchFlags`)
//! - The error taxonomy for monitors
//! - The monotonic clock collaborator

pub mod clock;
pub mod diff;
pub mod error;
pub mod event;
pub mod snapshot;

// Re-exports
pub use clock::{Clock, MonotonicClock};
pub use diff::{Change, DiffEngine, SnapshotDiff};
pub use error::MonitorError;
pub use event::{EventKind, RawEvent, WatchFlags};
pub use snapshot::{DirectoryEntry, Generation, Snapshot};

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
