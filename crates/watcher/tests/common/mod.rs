//! Shared helpers for watcher integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use watcher::{BackendPreference, EventKind, MainContext, Monitor, MonitorEngine, WatcherConfig};

/// Generous bound for anything that waits on the file system
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// One delivered callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub kind: EventKind,
    pub path: PathBuf,
    pub other: Option<PathBuf>,
}

impl Recorded {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            other: None,
        }
    }

    pub fn moved(kind: EventKind, path: impl Into<PathBuf>, other: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            other: Some(other.into()),
        }
    }
}

/// Collects every callback of a monitor
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Recorded>>>,
}

impl Recorder {
    pub fn attach(monitor: &Monitor) -> Self {
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        monitor.connect(move |_, path, other, kind| {
            events.lock().unwrap().push(Recorded {
                kind,
                path: path.to_path_buf(),
                other: other.map(Path::to_path_buf),
            });
        });
        recorder
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Pump `context` until `done` holds for the recorded events
    pub fn wait_until<F>(&self, context: &MainContext, mut done: F) -> bool
    where
        F: FnMut(&[Recorded]) -> bool,
    {
        context.run_until(TIMEOUT, || done(&self.events()))
    }
}

/// Engine on its own helper runtime with short intervals
pub fn engine(context: &MainContext, backend: BackendPreference, rate_limit_ms: u64) -> MonitorEngine {
    let config = WatcherConfig {
        backend,
        rate_limit_ms,
        diff_interval_ms: 25,
        poll_interval_ms: 25,
        mount_poll_interval_ms: 50,
        move_pair_window_ms: 100,
        ..WatcherConfig::default()
    };
    MonitorEngine::with_config(Arc::new(context.handle()), config).expect("engine")
}

/// Wait long enough for the diff backend to take a fresh listing
pub fn settle() {
    std::thread::sleep(Duration::from_millis(120));
}
