//! Stat polling backend for single files

use super::{check_mount, Backend, Capabilities, RawSink, Subscription, TaskGuard, WatchRequest};
use crate::mounts::MountProbe;
use fsmon_core::{EventKind, Generation, MonitorError, RawEvent, WatchFlags};
use smallvec::{smallvec, SmallVec};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};

pub struct PollBackend;

impl Backend for PollBackend {
    /// Polling never correlates moves
    type MoveKey = Infallible;

    const NAME: &'static str = "poll";
    const PRIORITY: i32 = 0;

    fn capabilities() -> Capabilities {
        Capabilities {
            supports_moves: false,
            supports_attribute_events: true,
            requires_polling: true,
        }
    }

    fn is_supported() -> bool {
        true
    }

    fn start(
        request: &WatchRequest,
        sink: RawSink<Infallible>,
        runtime: &Handle,
    ) -> Result<Subscription, MonitorError> {
        if request.is_directory || request.path.is_dir() {
            return Err(MonitorError::unsupported(
                Self::NAME,
                "cannot poll a directory",
            ));
        }

        let state = FileState::sample(&request.path);
        let probe = request
            .flags
            .contains(WatchFlags::WATCH_MOUNTS)
            .then(|| MountProbe::new(&request.path));

        tracing::debug!(
            "Polling {} every {:?}",
            request.path.display(),
            request.poll_interval
        );

        let token = sink.token().clone();
        let task = runtime.spawn(run(
            request.path.clone(),
            state,
            request.poll_interval,
            probe,
            sink,
        ));
        Ok(Subscription::new(token, TaskGuard::new(task)))
    }
}

/// Last observed state of the polled file
#[derive(Debug, Clone, Copy, PartialEq)]
enum FileState {
    Missing,
    Present { generation: Generation, inode: u64 },
}

impl FileState {
    fn sample(path: &Path) -> Self {
        match std::fs::symlink_metadata(path) {
            Ok(metadata) => FileState::Present {
                generation: Generation::from_metadata(&metadata),
                inode: inode_of(&metadata),
            },
            Err(_) => FileState::Missing,
        }
    }

    /// Events describing the move from `self` to `next`
    ///
    /// A new inode under the same name is a replacement even when size and
    /// mtime match.
    fn transition(&self, next: &FileState) -> SmallVec<[EventKind; 2]> {
        match (self, next) {
            (FileState::Missing, FileState::Missing) => SmallVec::new(),
            (FileState::Missing, FileState::Present { .. }) => smallvec![EventKind::Created],
            (FileState::Present { .. }, FileState::Missing) => smallvec![EventKind::Deleted],
            (
                FileState::Present {
                    generation: before,
                    inode: old_inode,
                },
                FileState::Present {
                    generation: after,
                    inode: new_inode,
                },
            ) => {
                if old_inode != new_inode {
                    smallvec![EventKind::Deleted, EventKind::Created]
                } else if before.content_differs(after) {
                    smallvec![EventKind::Changed]
                } else if before.attributes_differ(after) {
                    smallvec![EventKind::AttributeChanged]
                } else {
                    SmallVec::new()
                }
            }
        }
    }
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> u64 {
    0
}

async fn run(
    path: PathBuf,
    mut state: FileState,
    period: Duration,
    mut probe: Option<MountProbe>,
    sink: RawSink<Infallible>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = sink.token().cancelled() => return,
            _ = ticker.tick() => {}
        }

        let next = FileState::sample(&path);
        for kind in state.transition(&next) {
            if !sink.emit(RawEvent::new(kind, path.clone(), sink.now()), None) {
                return;
            }
        }
        state = next;

        if let Some(probe) = probe.as_mut() {
            check_mount(probe, &sink);
        }
    }
}
