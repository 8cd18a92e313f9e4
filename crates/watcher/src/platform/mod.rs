//! Backend adapters
//!
//! Each backend turns one OS primitive into keyed [`RawEvent`]s:
//! - `native`: push events from `notify` (inotify / FSEvents / ReadDirectoryChangesW)
//! - `diff`: periodic directory snapshots run through the diff engine
//! - `poll`: periodic stat of a single file
//!
//! Backends are ranked by priority and probed once per process.

pub mod diff;
pub mod native;
pub mod poll;

use crate::config::{BackendPreference, WatcherConfig};
use crate::mounts::MountProbe;
use crate::pairing::Keyed;
use fsmon_core::{Clock, EventKind, MonitorError, RawEvent, WatchFlags};
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use diff::DiffBackend;
pub use native::NativeBackend;
pub use poll::PollBackend;

/// What a backend can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_moves: bool,
    pub supports_attribute_events: bool,
    pub requires_polling: bool,
}

/// Parameters of one subscription
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub path: PathBuf,
    pub is_directory: bool,
    pub flags: WatchFlags,
    pub diff_interval: Duration,
    pub poll_interval: Duration,
    pub mount_poll_interval: Duration,
}

impl WatchRequest {
    pub fn new(path: impl Into<PathBuf>, is_directory: bool, flags: WatchFlags, config: &WatcherConfig) -> Self {
        Self {
            path: path.into(),
            is_directory,
            flags,
            diff_interval: config.diff_interval(),
            poll_interval: config.poll_interval(),
            mount_poll_interval: config.mount_poll_interval(),
        }
    }

    /// Directory the backend lists or subscribes to
    ///
    /// File watches observe their parent so creation and deletion are seen.
    pub fn observed_directory(&self) -> &Path {
        if self.is_directory {
            return &self.path;
        }
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

/// Message from a backend to the watch pipeline
#[derive(Debug)]
pub enum BackendSignal<K> {
    Event(Keyed<K>),
    /// Terminal failure; the backend stops producing
    Failed(MonitorError),
}

/// Sending side handed to a backend
///
/// Sends after the subscription was cancelled are stale and dropped here.
pub struct RawSink<K> {
    tx: mpsc::UnboundedSender<BackendSignal<K>>,
    token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl<K> Clone for RawSink<K> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            token: self.token.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<K> RawSink<K> {
    pub fn new(
        tx: mpsc::UnboundedSender<BackendSignal<K>>,
        token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { tx, token, clock }
    }

    /// Forward one event; returns false once the subscription is gone
    pub fn emit(&self, event: RawEvent, move_key: Option<K>) -> bool {
        if self.token.is_cancelled() {
            tracing::trace!("Dropping stale {}", event);
            return false;
        }
        self.tx
            .send(BackendSignal::Event(Keyed::new(event, move_key)))
            .is_ok()
    }

    /// Report a terminal failure
    pub fn fail(&self, error: MonitorError) {
        if self.token.is_cancelled() {
            return;
        }
        tracing::warn!("Backend failed: {}", error);
        let _ = self.tx.send(BackendSignal::Failed(error));
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Live backend subscription
///
/// Holds whatever keeps the OS primitive alive (a `notify` watcher, a task
/// guard). `cancel` drops it before returning.
pub struct Subscription {
    token: CancellationToken,
    guard: Mutex<Option<Box<dyn Send>>>,
}

impl Subscription {
    pub fn new<G: Send + 'static>(token: CancellationToken, guard: G) -> Self {
        Self {
            token,
            guard: Mutex::new(Some(Box::new(guard))),
        }
    }

    /// Stop producing events; idempotent
    pub fn cancel(&self) {
        self.token.cancel();
        let guard = self.guard.lock().take();
        drop(guard);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Aborts a spawned backend task when dropped
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sample `probe` and emit UNMOUNT for its path once the mount is gone
pub(crate) fn check_mount<K>(probe: &mut MountProbe, sink: &RawSink<K>) {
    if probe.check() {
        let event = RawEvent::new(EventKind::Unmount, probe.path().to_path_buf(), sink.now());
        sink.emit(event, None);
    }
}

/// A source of raw events
///
/// Backends are zero-sized; the engine dispatches on [`BackendKind`] and
/// monomorphizes the pipeline over each backend's `MoveKey`.
pub trait Backend: Send + Sync + 'static {
    /// Correlation key between the halves of a move
    type MoveKey: Clone + Eq + Hash + Send + fmt::Debug + 'static;

    const NAME: &'static str;
    const PRIORITY: i32;

    fn capabilities() -> Capabilities;

    /// Probe the runtime without keeping any resources
    fn is_supported() -> bool;

    /// Start producing events for `request` into `sink`
    fn start(
        request: &WatchRequest,
        sink: RawSink<Self::MoveKey>,
        runtime: &Handle,
    ) -> Result<Subscription, MonitorError>;
}

/// Registered backends, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Native,
    Diff,
    Poll,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Native, BackendKind::Diff, BackendKind::Poll];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Native => NativeBackend::NAME,
            BackendKind::Diff => DiffBackend::NAME,
            BackendKind::Poll => PollBackend::NAME,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            BackendKind::Native => NativeBackend::PRIORITY,
            BackendKind::Diff => DiffBackend::PRIORITY,
            BackendKind::Poll => PollBackend::PRIORITY,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            BackendKind::Native => NativeBackend::capabilities(),
            BackendKind::Diff => DiffBackend::capabilities(),
            BackendKind::Poll => PollBackend::capabilities(),
        }
    }

    /// Cached result of the process-wide probe
    pub fn is_supported(&self) -> bool {
        supported_backends().contains(self)
    }

    fn probe(&self) -> bool {
        match self {
            BackendKind::Native => NativeBackend::is_supported(),
            BackendKind::Diff => DiffBackend::is_supported(),
            BackendKind::Poll => PollBackend::is_supported(),
        }
    }

    pub fn from_preference(preference: BackendPreference) -> Option<Self> {
        match preference {
            BackendPreference::Auto => None,
            BackendPreference::Native => Some(BackendKind::Native),
            BackendPreference::Diff => Some(BackendKind::Diff),
            BackendPreference::Poll => Some(BackendKind::Poll),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Supported backends in priority order, probed once per process
pub fn supported_backends() -> &'static [BackendKind] {
    static SUPPORTED: OnceLock<Vec<BackendKind>> = OnceLock::new();
    SUPPORTED.get_or_init(|| {
        let mut ranked: Vec<BackendKind> = BackendKind::ALL.to_vec();
        ranked.sort_by_key(|kind| std::cmp::Reverse(kind.priority()));
        let supported: Vec<BackendKind> = ranked.into_iter().filter(|kind| kind.probe()).collect();
        tracing::info!(
            "Supported backends: {}",
            supported
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        supported
    })
}

/// Backend the probe selected for this process
pub fn default_backend() -> BackendKind {
    supported_backends()
        .first()
        .copied()
        .unwrap_or(BackendKind::Poll)
}

/// Backends to try for a new watch, in order
///
/// A preference starts the list at that backend even if the probe rejected
/// it, so an explicit choice reports its own error; lower-priority supported
/// backends follow as fallbacks.
pub fn candidates(preference: BackendPreference) -> Vec<BackendKind> {
    let supported = supported_backends();
    match BackendKind::from_preference(preference) {
        None => supported.to_vec(),
        Some(first) => std::iter::once(first)
            .chain(
                supported
                    .iter()
                    .copied()
                    .filter(|kind| kind.priority() < first.priority()),
            )
            .collect(),
    }
}
