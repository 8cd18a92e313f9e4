//! Event vocabulary shared by backends, the pipeline and callbacks

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Kind of change reported to a monitor callback
///
/// The set and the order of the variants is stable across the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// File contents changed
    Changed,
    /// A burst of changes has settled
    ChangesDoneHint,
    /// File or directory was deleted
    Deleted,
    /// File or directory was created
    Created,
    /// Metadata (mode, ownership, timestamps) changed
    AttributeChanged,
    /// The mount holding the path is about to go away
    PreUnmount,
    /// The mount holding the path went away
    Unmount,
    /// Legacy unpaired move, reported with `SEND_MOVED`
    Moved,
    /// Renamed within the watched directory (`other` is the new name)
    Renamed,
    /// Moved into the watched directory from elsewhere
    MovedIn,
    /// Moved out of the watched directory
    MovedOut,
}

impl EventKind {
    /// Upper-case name as printed by tools
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Changed => "CHANGED",
            EventKind::ChangesDoneHint => "CHANGES_DONE_HINT",
            EventKind::Deleted => "DELETED",
            EventKind::Created => "CREATED",
            EventKind::AttributeChanged => "ATTRIBUTE_CHANGED",
            EventKind::PreUnmount => "PRE_UNMOUNT",
            EventKind::Unmount => "UNMOUNT",
            EventKind::Moved => "MOVED",
            EventKind::Renamed => "RENAMED",
            EventKind::MovedIn => "MOVED_IN",
            EventKind::MovedOut => "MOVED_OUT",
        }
    }

    /// Whether this kind carries a second path
    pub fn is_move(&self) -> bool {
        matches!(
            self,
            EventKind::Moved | EventKind::Renamed | EventKind::MovedIn | EventKind::MovedOut
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Flags accepted by `monitor_file` / `monitor_directory`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct WatchFlags: u32 {
        /// Report UNMOUNT for the mount holding the watched path
        const WATCH_MOUNTS = 1 << 0;
        /// Report paired moves as a single legacy MOVED event
        const SEND_MOVED = 1 << 1;
        /// Report RENAMED / MOVED_IN / MOVED_OUT
        const WATCH_MOVES = 1 << 2;
        /// Watch the file itself so writes through other hard links are seen
        const WATCH_HARD_LINKS = 1 << 3;
    }
}

impl WatchFlags {
    /// Whether native move pairs should be kept together
    pub fn wants_moves(&self) -> bool {
        self.intersects(WatchFlags::SEND_MOVED | WatchFlags::WATCH_MOVES)
    }
}

/// A normalized event travelling from a backend to the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// What happened
    pub kind: EventKind,
    /// Path the event is about
    pub primary_path: PathBuf,
    /// Second path for moves (new name for RENAMED)
    pub secondary_path: Option<PathBuf>,
    /// Monotonic time the backend observed the event
    pub timestamp: Instant,
}

impl RawEvent {
    pub fn new(kind: EventKind, primary_path: impl Into<PathBuf>, timestamp: Instant) -> Self {
        Self {
            kind,
            primary_path: primary_path.into(),
            secondary_path: None,
            timestamp,
        }
    }

    pub fn with_secondary(
        kind: EventKind,
        primary_path: impl Into<PathBuf>,
        secondary_path: impl Into<PathBuf>,
        timestamp: Instant,
    ) -> Self {
        Self {
            kind,
            primary_path: primary_path.into(),
            secondary_path: Some(secondary_path.into()),
            timestamp,
        }
    }

    /// Same event with a different kind
    pub fn rekind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether either path of the event is `path`
    pub fn mentions(&self, path: &Path) -> bool {
        self.primary_path == path || self.secondary_path.as_deref() == Some(path)
    }
}

impl fmt::Display for RawEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary_path {
            Some(other) => write!(
                f,
                "{}: {} -> {}",
                self.primary_path.display(),
                self.kind,
                other.display()
            ),
            None => write!(f, "{}: {}", self.primary_path.display(), self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_moves() {
        assert!(!WatchFlags::empty().wants_moves());
        assert!(!WatchFlags::WATCH_MOUNTS.wants_moves());
        assert!(WatchFlags::SEND_MOVED.wants_moves());
        assert!((WatchFlags::WATCH_MOVES | WatchFlags::WATCH_HARD_LINKS).wants_moves());
    }

    #[test]
    fn test_display_with_other_path() {
        let now = Instant::now();
        let ev = RawEvent::with_secondary(EventKind::Renamed, "/d/a", "/d/b", now);
        assert_eq!(ev.to_string(), "/d/a: RENAMED -> /d/b");
        assert!(ev.mentions(Path::new("/d/b")));
        assert!(!ev.mentions(Path::new("/d/c")));
    }

    #[test]
    fn test_move_kinds() {
        assert!(EventKind::Moved.is_move());
        assert!(EventKind::MovedOut.is_move());
        assert!(!EventKind::ChangesDoneHint.is_move());
        assert_eq!(EventKind::AttributeChanged.to_string(), "ATTRIBUTE_CHANGED");
    }
}
