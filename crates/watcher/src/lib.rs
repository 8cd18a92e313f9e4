//! File system change notification for fsmon
//!
//! This crate turns OS signals into one normalized event stream:
//! - Backend adapters (native push, snapshot diff, stat poll) ranked and probed once
//! - Move pairing of delete/create halves by cookie or inode
//! - Per-path rate limiting with CHANGES_DONE_HINT synthesis
//! - A registry that guarantees no delivery after cancel
//! - Delivery by posting into the watch's owning context

pub mod config;
pub mod context;
pub mod debounce;
pub mod monitor;
pub mod mounts;
pub mod pairing;
pub mod pipeline;
pub mod platform;
pub mod registry;

pub use config::{BackendPreference, ConfigError, WatcherConfig};
pub use context::{ContextHandle, Dispatch, Job, MainContext};
pub use monitor::{default_context, monitor_directory, monitor_file, Monitor, MonitorEngine};
pub use platform::{BackendKind, Capabilities};
pub use registry::{WatchId, WatchRegistry};

pub use fsmon_core::{EventKind, MonitorError, RawEvent, WatchFlags};
