//! Native push backend on top of `notify`

use super::{check_mount, Backend, Capabilities, RawSink, Subscription, TaskGuard, WatchRequest};
use crate::mounts::MountProbe;
use crate::pairing::Keyed;
use fsmon_core::{EventKind, MonitorError, RawEvent, WatchFlags};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use smallvec::SmallVec;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// inotify / FSEvents / ReadDirectoryChangesW via `notify::RecommendedWatcher`
pub struct NativeBackend;

impl Backend for NativeBackend {
    /// Rename cookie reported by the OS
    type MoveKey = usize;

    const NAME: &'static str = "native";
    const PRIORITY: i32 = 20;

    fn capabilities() -> Capabilities {
        Capabilities {
            supports_moves: true,
            supports_attribute_events: true,
            requires_polling: false,
        }
    }

    fn is_supported() -> bool {
        match RecommendedWatcher::new(|_: notify::Result<Event>| {}, Config::default()) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!("Native backend unavailable: {}", err);
                false
            }
        }
    }

    fn start(
        request: &WatchRequest,
        sink: RawSink<usize>,
        runtime: &Handle,
    ) -> Result<Subscription, MonitorError> {
        let observed = request.observed_directory().to_path_buf();
        let hard_links = !request.is_directory
            && request.flags.contains(WatchFlags::WATCH_HARD_LINKS)
            && request.path.exists();

        let mut relay = Relay::new(request, hard_links);
        let handler_sink = sink.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if event.need_rescan() {
                        tracing::warn!("Native event queue overflowed, events were lost");
                    }
                    relay.forward(&event, &handler_sink);
                }
                Err(err) => tracing::warn!("Native watcher error: {}", err),
            },
            Config::default(),
        )
        .map_err(|err| map_notify_error(&observed, err))?;

        watcher
            .watch(&observed, RecursiveMode::NonRecursive)
            .map_err(|err| map_notify_error(&observed, err))?;

        // Writes through another hard link only show up on the inode itself
        if hard_links {
            watcher
                .watch(&request.path, RecursiveMode::NonRecursive)
                .map_err(|err| map_notify_error(&request.path, err))?;
        }

        let mount_task = request
            .flags
            .contains(WatchFlags::WATCH_MOUNTS)
            .then(|| {
                TaskGuard::new(runtime.spawn(watch_mounts(
                    MountProbe::new(&request.path),
                    request.mount_poll_interval,
                    sink.clone(),
                )))
            });

        tracing::debug!("Native watch on {}", observed.display());
        Ok(Subscription::new(sink.token().clone(), (watcher, mount_task)))
    }
}

async fn watch_mounts(mut probe: MountProbe, period: Duration, sink: RawSink<usize>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = sink.token().cancelled() => return,
            _ = ticker.tick() => check_mount(&mut probe, &sink),
        }
    }
}

/// Per-subscription stage between `translate` and the sink
///
/// A directory watch fails once its own directory is removed or moved away.
/// With the hard-link watch installed the kernel reports most events on the
/// watched file twice, once per watch, back to back; the repeat is dropped.
struct Relay {
    path: PathBuf,
    directory_watch: bool,
    collapse_repeats: bool,
    last_on_path: Option<(EventKind, Option<PathBuf>)>,
    failed: bool,
}

impl Relay {
    fn new(request: &WatchRequest, hard_links: bool) -> Self {
        Self {
            path: request.path.clone(),
            directory_watch: request.is_directory,
            collapse_repeats: hard_links,
            last_on_path: None,
            failed: false,
        }
    }

    fn forward(&mut self, event: &Event, sink: &RawSink<usize>) {
        if self.failed {
            return;
        }
        for keyed in translate(event, sink.now()) {
            if self.removes_watched_directory(&keyed.event) {
                self.failed = true;
                sink.fail(MonitorError::capture(
                    &self.path,
                    io::Error::new(io::ErrorKind::NotFound, "watched directory was removed"),
                ));
                return;
            }
            if self.is_repeat(&keyed.event) {
                tracing::trace!("Dropping repeated {}", keyed.event);
                continue;
            }
            if !sink.emit(keyed.event, keyed.move_key) {
                return;
            }
        }
    }

    fn removes_watched_directory(&self, event: &RawEvent) -> bool {
        self.directory_watch
            && matches!(event.kind, EventKind::Deleted | EventKind::MovedOut)
            && event.primary_path == self.path
    }

    fn is_repeat(&mut self, event: &RawEvent) -> bool {
        if !self.collapse_repeats || event.primary_path != self.path {
            return false;
        }
        let current = (event.kind, event.secondary_path.clone());
        let repeat = !event.kind.is_move() && self.last_on_path.as_ref() == Some(&current);
        self.last_on_path = Some(current);
        repeat
    }
}

/// Map one `notify` event onto the raw vocabulary
pub(crate) fn translate(event: &Event, now: Instant) -> SmallVec<[Keyed<usize>; 2]> {
    use notify::EventKind as Kind;

    let mut out = SmallVec::new();
    let cookie = event.tracker();
    let single = |kind: EventKind, key: Option<usize>, out: &mut SmallVec<[Keyed<usize>; 2]>| {
        for path in &event.paths {
            out.push(Keyed::new(RawEvent::new(kind, path.clone(), now), key));
        }
    };

    match &event.kind {
        Kind::Create(_) => single(EventKind::Created, None, &mut out),
        Kind::Remove(_) => single(EventKind::Deleted, None, &mut out),
        Kind::Modify(ModifyKind::Metadata(_)) => single(EventKind::AttributeChanged, None, &mut out),
        Kind::Modify(ModifyKind::Data(_)) | Kind::Modify(ModifyKind::Any) | Kind::Modify(ModifyKind::Other) => {
            single(EventKind::Changed, None, &mut out)
        }
        Kind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => single(EventKind::MovedOut, cookie, &mut out),
            RenameMode::To => single(EventKind::MovedIn, cookie, &mut out),
            // inotify also reports both halves with the cookie; those pair downstream
            RenameMode::Both if cookie.is_some() => {}
            RenameMode::Both | RenameMode::Any | RenameMode::Other if event.paths.len() >= 2 => {
                out.push(Keyed::plain(RawEvent::with_secondary(
                    EventKind::Renamed,
                    event.paths[0].clone(),
                    event.paths[1].clone(),
                    now,
                )));
            }
            // FSEvents names one side of a rename without saying which
            _ => {
                for path in &event.paths {
                    let kind = if path.symlink_metadata().is_ok() {
                        EventKind::MovedIn
                    } else {
                        EventKind::MovedOut
                    };
                    out.push(Keyed::new(RawEvent::new(kind, path.clone(), now), cookie));
                }
            }
        },
        Kind::Access(AccessKind::Close(AccessMode::Write)) => {
            single(EventKind::ChangesDoneHint, None, &mut out)
        }
        Kind::Access(_) | Kind::Any | Kind::Other => {}
    }

    out
}

fn map_notify_error(path: &Path, err: notify::Error) -> MonitorError {
    let path: PathBuf = path.to_path_buf();
    match err.kind {
        notify::ErrorKind::MaxFilesWatch => MonitorError::BackendResourceExhausted {
            path,
            reason: "native watch limit reached".to_string(),
        },
        notify::ErrorKind::Io(source) => MonitorError::from_subscribe_io(path, source),
        notify::ErrorKind::PathNotFound => MonitorError::Io {
            path,
            source: io::Error::new(io::ErrorKind::NotFound, "path not found"),
        },
        other => MonitorError::Io {
            path,
            source: io::Error::new(io::ErrorKind::Other, format!("{:?}", other)),
        },
    }
}
