//! Per-watch event pipeline
//!
//! backend signal → move pairing → file filter → flag translation → rate
//! limiter → post to the owning context. One tokio task per watch owns all of
//! this state, including the timers, and exits when its token is cancelled.

use crate::context::Dispatch;
use crate::debounce::RateLimiter;
use crate::pairing::{Batch, Keyed, MovePairer};
use crate::platform::BackendSignal;
use crate::registry::{WatchId, WatchRegistry};
use fsmon_core::{Clock, EventKind, MonitorError, RawEvent, WatchFlags};
use smallvec::{smallvec, SmallVec};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single idle wait
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Static description of the watch a pipeline serves
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub path: PathBuf,
    pub is_directory: bool,
    pub flags: WatchFlags,
    pub move_pair_window: Duration,
    pub max_pending_moves: usize,
    /// Shared with `Monitor::set_rate_limit`, in milliseconds
    pub rate_limit_ms: Arc<AtomicU64>,
}

/// Apply the move-reporting flags to a paired event
pub fn translate_flags(event: RawEvent, flags: WatchFlags) -> SmallVec<[RawEvent; 2]> {
    let watch_moves = flags.contains(WatchFlags::WATCH_MOVES);
    let send_moved = flags.contains(WatchFlags::SEND_MOVED);

    match event.kind {
        EventKind::Renamed if watch_moves => smallvec![event],
        EventKind::Renamed if send_moved => smallvec![event.rekind(EventKind::Moved)],
        EventKind::Renamed => {
            let RawEvent {
                primary_path,
                secondary_path,
                timestamp,
                ..
            } = event;
            let mut out = smallvec![RawEvent::new(EventKind::Deleted, primary_path, timestamp)];
            if let Some(created) = secondary_path {
                out.push(RawEvent::new(EventKind::Created, created, timestamp));
            }
            out
        }
        EventKind::MovedOut if !watch_moves => smallvec![event.rekind(EventKind::Deleted)],
        EventKind::MovedIn if !watch_moves => smallvec![event.rekind(EventKind::Created)],
        _ => smallvec![event],
    }
}

/// Spawn the pipeline task of one watch
#[allow(clippy::too_many_arguments)]
pub fn spawn<K>(
    runtime: &Handle,
    id: WatchId,
    rx: mpsc::UnboundedReceiver<BackendSignal<K>>,
    settings: PipelineSettings,
    registry: Arc<WatchRegistry>,
    dispatch: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    K: Eq + Send + 'static,
{
    let pipeline = Pipeline::new(id, settings, registry, dispatch, clock);
    runtime.spawn(pipeline.run(rx, token))
}

struct Pipeline<K> {
    id: WatchId,
    settings: PipelineSettings,
    pairer: MovePairer<K>,
    limiter: RateLimiter,
    registry: Arc<WatchRegistry>,
    dispatch: Arc<dyn Dispatch>,
    clock: Arc<dyn Clock>,
}

impl<K: Eq> Pipeline<K> {
    fn new(
        id: WatchId,
        settings: PipelineSettings,
        registry: Arc<WatchRegistry>,
        dispatch: Arc<dyn Dispatch>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window = Duration::from_millis(settings.rate_limit_ms.load(Ordering::Relaxed));
        Self {
            id,
            pairer: MovePairer::new(settings.move_pair_window, settings.max_pending_moves),
            limiter: RateLimiter::new(window),
            settings,
            registry,
            dispatch,
            clock,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BackendSignal<K>>, token: CancellationToken) {
        loop {
            let wait = self
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(self.clock.now()));

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(BackendSignal::Event(keyed)) => {
                        let now = self.clock.now();
                        self.on_event(keyed, now);
                    }
                    Some(BackendSignal::Failed(error)) => {
                        self.on_failure(error);
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep(wait.unwrap_or(IDLE_WAIT)), if wait.is_some() => {
                    let now = self.clock.now();
                    self.on_timer(now);
                }
            }
        }
        tracing::trace!("Pipeline of {} stopped", self.id);
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.pairer.next_deadline(), self.limiter.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_event(&mut self, keyed: Keyed<K>, now: Instant) {
        let released = self.pairer.push(keyed, now);
        self.forward(released, now);
    }

    fn on_timer(&mut self, now: Instant) {
        let released = self.pairer.expire(now);
        self.forward(released, now);
        for hint in self.limiter.fire_expired(now) {
            self.post(hint);
        }
    }

    /// Terminal failure: flush, report the watched path deleted, record the error
    fn on_failure(&mut self, error: MonitorError) {
        let now = self.clock.now();
        let released = self.pairer.flush();
        self.forward(released, now);
        self.limiter.clear();

        // Must be visible to the callback receiving the DELETED
        self.registry.fail(self.id, error);
        self.post(RawEvent::new(
            EventKind::Deleted,
            self.settings.path.clone(),
            now,
        ));
    }

    fn forward(&mut self, released: Batch, now: Instant) {
        if released.is_empty() {
            return;
        }
        self.sync_rate_limit();

        for event in released {
            for translated in translate_flags(event, self.settings.flags) {
                if !self.accepts(&translated) {
                    continue;
                }
                for limited in self.limiter.process(translated, now) {
                    self.post(limited);
                }
            }
        }
    }

    /// File watches only see events about the watched file
    fn accepts(&self, event: &RawEvent) -> bool {
        self.settings.is_directory || event.mentions(&self.settings.path)
    }

    fn sync_rate_limit(&mut self) {
        let window = Duration::from_millis(self.settings.rate_limit_ms.load(Ordering::Relaxed));
        if window != self.limiter.window() {
            tracing::debug!("{} rate limit now {:?}", self.id, window);
            self.limiter.set_window(window);
        }
    }

    fn post(&self, event: RawEvent) {
        tracing::debug!("{} {}", self.id, event);
        let registry = self.registry.clone();
        let id = self.id;
        self.dispatch.post(Box::new(move || {
            if let Err(err) = registry.deliver(id, &event) {
                tracing::trace!("Discarded {} for {}: {}", event, id, err);
            }
        }));
    }
}
