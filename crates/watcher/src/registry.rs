//! Watch registry
//!
//! Single source of truth for whether a watch may still deliver. `cancel` and
//! `deliver` take the same re-entrant lock, so a callback never runs after
//! `cancel` has returned, and a callback may cancel its own monitor.

use crate::monitor::{Monitor, MonitorShared};
use crate::platform::Subscription;
use fsmon_core::{EventKind, MonitorError, RawEvent, WatchFlags};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Callback invoked for every delivered event
pub type Callback = Arc<dyn Fn(&Monitor, &Path, Option<&Path>, EventKind) + Send + Sync>;

/// Identifier of one watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

struct WatchEntry {
    path: PathBuf,
    flags: WatchFlags,
    cancelled: bool,
    subscription: Option<Subscription>,
    pipeline: Option<CancellationToken>,
    callbacks: Vec<Callback>,
    failure: Option<Arc<MonitorError>>,
    monitor: Weak<MonitorShared>,
}

#[derive(Default)]
struct Inner {
    watches: HashMap<WatchId, WatchEntry>,
    by_path: HashMap<PathBuf, Vec<WatchId>>,
}

impl Inner {
    fn unindex(&mut self, id: WatchId, path: &Path) {
        if let Some(ids) = self.by_path.get_mut(path) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_path.remove(path);
            }
        }
    }
}

/// id → watch state, plus a path → ids index
pub struct WatchRegistry {
    inner: ReentrantMutex<RefCell<Inner>>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a watch; watches on the same path never share state
    pub fn register(&self, path: &Path, flags: WatchFlags) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.watches.insert(
            id,
            WatchEntry {
                path: path.to_path_buf(),
                flags,
                cancelled: false,
                subscription: None,
                pipeline: None,
                callbacks: Vec::new(),
                failure: None,
                monitor: Weak::new(),
            },
        );
        inner.by_path.entry(path.to_path_buf()).or_default().push(id);
        tracing::debug!("Registered {} for {}", id, path.display());
        id
    }

    /// Link the public handle handed to callbacks
    pub(crate) fn bind(&self, id: WatchId, monitor: Weak<MonitorShared>) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(entry) = inner.watches.get_mut(&id) {
            entry.monitor = monitor;
        }
    }

    /// Store the live backend subscription and pipeline token
    ///
    /// If the watch was cancelled in the meantime both are torn down at once.
    pub fn attach(&self, id: WatchId, subscription: Subscription, pipeline: CancellationToken) {
        let guard = self.inner.lock();
        let rejected = {
            let mut inner = guard.borrow_mut();
            match inner.watches.get_mut(&id) {
                Some(entry) if !entry.cancelled => {
                    entry.subscription = Some(subscription);
                    entry.pipeline = Some(pipeline);
                    None
                }
                _ => Some((subscription, pipeline)),
            }
        };
        drop(guard);

        if let Some((subscription, pipeline)) = rejected {
            pipeline.cancel();
            subscription.cancel();
        }
    }

    /// Add a callback
    pub fn connect(&self, id: WatchId, callback: Callback) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(entry) = inner.watches.get_mut(&id) {
            entry.callbacks.push(callback);
        }
    }

    /// Cancel a watch
    ///
    /// Idempotent: returns true only for the call that actually cancelled.
    /// The subscription and pipeline are stopped before this returns.
    pub fn cancel(&self, id: WatchId) -> bool {
        let guard = self.inner.lock();
        let teardown = {
            let mut inner = guard.borrow_mut();
            let Some(entry) = inner.watches.get_mut(&id) else {
                return false;
            };
            if entry.cancelled {
                return false;
            }
            entry.cancelled = true;
            let path = entry.path.clone();
            let teardown = (entry.subscription.take(), entry.pipeline.take());
            inner.unindex(id, &path);
            teardown
        };

        let (subscription, pipeline) = teardown;
        if let Some(pipeline) = pipeline {
            pipeline.cancel();
        }
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        drop(guard);

        tracing::info!("Cancelled {}", id);
        true
    }

    /// Cancel and drop all state of a watch
    pub(crate) fn forget(&self, id: WatchId) {
        self.cancel(id);
        let guard = self.inner.lock();
        let removed = guard.borrow_mut().watches.remove(&id);
        drop(guard);
        drop(removed);
    }

    /// Hand one finalized event to the callbacks of `id`
    ///
    /// Runs on the owning context. Fails with `CancelledRace` when the watch
    /// was cancelled after the event was queued.
    pub fn deliver(&self, id: WatchId, event: &RawEvent) -> Result<(), MonitorError> {
        let guard = self.inner.lock();
        let (callbacks, shared) = {
            let inner = guard.borrow();
            match inner.watches.get(&id) {
                Some(entry) if !entry.cancelled => (entry.callbacks.clone(), entry.monitor.upgrade()),
                _ => return Err(MonitorError::CancelledRace),
            }
        };
        let Some(shared) = shared else {
            return Err(MonitorError::CancelledRace);
        };
        let monitor = Monitor::from_shared(shared);

        for callback in callbacks {
            // An earlier callback may have cancelled the watch
            if self.is_cancelled(id) {
                break;
            }
            callback(
                &monitor,
                &event.primary_path,
                event.secondary_path.as_deref(),
                event.kind,
            );
        }

        // The last handle may go here, which re-enters the lock to cancel
        drop(monitor);
        drop(guard);
        Ok(())
    }

    /// Record a terminal backend failure
    pub fn fail(&self, id: WatchId, error: MonitorError) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if let Some(entry) = inner.watches.get_mut(&id) {
            tracing::warn!("{} on {} failed: {}", id, entry.path.display(), error);
            entry.failure = Some(Arc::new(error));
        }
    }

    pub fn failure(&self, id: WatchId) -> Option<Arc<MonitorError>> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.watches.get(&id).and_then(|entry| entry.failure.clone())
    }

    /// Unknown ids count as cancelled
    pub fn is_cancelled(&self, id: WatchId) -> bool {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.watches.get(&id).map_or(true, |entry| entry.cancelled)
    }

    pub fn flags(&self, id: WatchId) -> Option<WatchFlags> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.watches.get(&id).map(|entry| entry.flags)
    }

    /// Number of live (not cancelled) watches
    pub fn watch_count(&self) -> usize {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.watches.values().filter(|entry| !entry.cancelled).count()
    }

    /// Live watches on `path`, oldest first
    pub fn watches_for(&self, path: &Path) -> Vec<WatchId> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner.by_path.get(path).cloned().unwrap_or_default()
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
