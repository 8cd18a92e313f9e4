//! Snapshot diff backend
//!
//! Lists the observed directory on an interval and runs the diff engine on
//! consecutive listings. Works wherever `read_dir` does.

use super::{check_mount, Backend, Capabilities, RawSink, Subscription, TaskGuard, WatchRequest};
use crate::mounts::MountProbe;
use fsmon_core::{Change, DiffEngine, EventKind, MonitorError, RawEvent, Snapshot, WatchFlags};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};

pub struct DiffBackend;

impl Backend for DiffBackend {
    /// Inode of the entry
    type MoveKey = u64;

    const NAME: &'static str = "diff";
    const PRIORITY: i32 = 10;

    fn capabilities() -> Capabilities {
        Capabilities {
            supports_moves: true,
            supports_attribute_events: true,
            requires_polling: true,
        }
    }

    fn is_supported() -> bool {
        true
    }

    fn start(
        request: &WatchRequest,
        sink: RawSink<u64>,
        runtime: &Handle,
    ) -> Result<Subscription, MonitorError> {
        let engine = DiffEngine::with_baseline(request.observed_directory())?;
        let probe = request
            .flags
            .contains(WatchFlags::WATCH_MOUNTS)
            .then(|| MountProbe::new(&request.path));

        tracing::debug!(
            "Diffing {} every {:?}",
            engine.directory().display(),
            request.diff_interval
        );

        let token = sink.token().clone();
        let task = runtime.spawn(run(engine, request.diff_interval, probe, sink));
        Ok(Subscription::new(token, TaskGuard::new(task)))
    }
}

async fn run(mut engine: DiffEngine, period: Duration, mut probe: Option<MountProbe>, sink: RawSink<u64>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The baseline was captured at start
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = sink.token().cancelled() => return,
            _ = ticker.tick() => {}
        }

        let directory = engine.directory().to_path_buf();
        let captured = tokio::task::spawn_blocking(move || Snapshot::capture(&directory)).await;
        let snapshot = match captured {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                sink.fail(err);
                return;
            }
            Err(join_err) => {
                sink.fail(MonitorError::Io {
                    path: engine.directory().to_path_buf(),
                    source: io::Error::new(io::ErrorKind::Other, join_err.to_string()),
                });
                return;
            }
        };

        let diff = engine.advance(snapshot);
        if !diff.is_empty() {
            tracing::trace!("{} changes in {}", diff.len(), engine.directory().display());
        }
        for change in diff {
            let (event, key) = to_raw(engine.directory(), change, &sink);
            if !sink.emit(event, key) {
                return;
            }
        }

        if let Some(probe) = probe.as_mut() {
            check_mount(probe, &sink);
        }
    }
}

/// Turn one diff change into a raw event keyed by inode
fn to_raw(directory: &Path, change: Change, sink: &RawSink<u64>) -> (RawEvent, Option<u64>) {
    let now = sink.now();
    match change {
        Change::Created { name, inode } => (
            RawEvent::new(EventKind::Created, directory.join(name), now),
            Some(inode),
        ),
        Change::Deleted { name, inode } => (
            RawEvent::new(EventKind::Deleted, directory.join(name), now),
            Some(inode),
        ),
        Change::Renamed { from, to, .. } => (
            RawEvent::with_secondary(EventKind::Renamed, directory.join(from), directory.join(to), now),
            None,
        ),
        Change::Changed { name } => (RawEvent::new(EventKind::Changed, directory.join(name), now), None),
        Change::AttributeChanged { name } => (
            RawEvent::new(EventKind::AttributeChanged, directory.join(name), now),
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatcherConfig;
    use crate::platform::BackendSignal;
    use fsmon_core::MonotonicClock;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn request(path: &Path, is_directory: bool) -> WatchRequest {
        let config = WatcherConfig {
            diff_interval_ms: 20,
            ..WatcherConfig::default()
        };
        WatchRequest::new(path, is_directory, WatchFlags::empty(), &config)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<BackendSignal<u64>>) -> (RawEvent, Option<u64>) {
        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match signal {
            BackendSignal::Event(keyed) => (keyed.event, keyed.move_key),
            BackendSignal::Failed(err) => panic!("unexpected failure: {err}"),
        }
    }

    #[tokio::test]
    async fn test_rename_is_reported_whole() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a"), b"1").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RawSink::new(tx, CancellationToken::new(), Arc::new(MonotonicClock));
        let subscription =
            DiffBackend::start(&request(temp_dir.path(), true), sink, &Handle::current()).unwrap();

        std::fs::rename(temp_dir.path().join("a"), temp_dir.path().join("b")).unwrap();

        let (event, key) = next_event(&mut rx).await;
        assert_eq!(event.kind, EventKind::Renamed);
        assert_eq!(event.primary_path, temp_dir.path().join("a"));
        assert_eq!(event.secondary_path, Some(temp_dir.path().join("b")));
        assert_eq!(key, None);

        subscription.cancel();
    }

    #[tokio::test]
    async fn test_created_carries_inode_key() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RawSink::new(tx, CancellationToken::new(), Arc::new(MonotonicClock));
        let _subscription =
            DiffBackend::start(&request(temp_dir.path(), true), sink, &Handle::current()).unwrap();

        std::fs::write(temp_dir.path().join("new"), b"x").unwrap();

        let (event, key) = next_event(&mut rx).await;
        assert_eq!(event.kind, EventKind::Created);
        assert!(key.is_some());
    }

    #[tokio::test]
    async fn test_removed_directory_is_terminal() {
        let temp_dir = TempDir::new().unwrap();
        let watched = temp_dir.path().join("watched");
        std::fs::create_dir(&watched).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = RawSink::new(tx, CancellationToken::new(), Arc::new(MonotonicClock));
        let _subscription =
            DiffBackend::start(&request(&watched, true), sink, &Handle::current()).unwrap();

        std::fs::remove_dir(&watched).unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            signal,
            BackendSignal::Failed(MonitorError::SnapshotCaptureFailed { .. })
        ));
    }

    #[test]
    fn test_missing_directory_fails_at_start() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let temp_dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = RawSink::new(tx, CancellationToken::new(), Arc::new(MonotonicClock));

        let result = DiffBackend::start(
            &request(&temp_dir.path().join("missing"), true),
            sink,
            runtime.handle(),
        );
        assert!(matches!(result, Err(MonitorError::SnapshotCaptureFailed { .. })));
    }
}
