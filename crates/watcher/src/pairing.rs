//! Move pairing heuristic
//!
//! Correlates a DELETED / MOVED_OUT with a later CREATED / MOVED_IN sharing the
//! same move key (inotify cookie or inode) into one RENAMED. The key type is the
//! backend's associated `MoveKey`, so the pairer never knows which it is.
//!
//! Output order equals input order: events queued behind an unmatched
//! delete are held until it is matched or its window elapses.

use fsmon_core::{EventKind, RawEvent};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A raw event plus its optional move correlation key
#[derive(Debug, Clone)]
pub struct Keyed<K> {
    pub event: RawEvent,
    pub move_key: Option<K>,
}

impl<K> Keyed<K> {
    pub fn new(event: RawEvent, move_key: Option<K>) -> Self {
        Self { event, move_key }
    }

    /// Event without a correlation key
    pub fn plain(event: RawEvent) -> Self {
        Self {
            event,
            move_key: None,
        }
    }
}

/// Small batch of output events
pub type Batch = SmallVec<[RawEvent; 4]>;

enum Slot<K> {
    Ready(RawEvent),
    Pending {
        event: RawEvent,
        key: K,
        expires: Instant,
    },
}

/// Bounded FIFO lookback buffer for one watch
pub struct MovePairer<K> {
    queue: VecDeque<Slot<K>>,
    window: Duration,
    max_pending: usize,
    pending: usize,
}

impl<K: Eq> MovePairer<K> {
    pub fn new(window: Duration, max_pending: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            window,
            max_pending: max_pending.max(1),
            pending: 0,
        }
    }

    /// Feed one event, returning whatever became releasable
    pub fn push(&mut self, keyed: Keyed<K>, now: Instant) -> Batch {
        let Keyed { event, move_key } = keyed;

        match (event.kind, move_key) {
            (EventKind::Deleted | EventKind::MovedOut, Some(key)) => {
                self.queue.push_back(Slot::Pending {
                    event,
                    key,
                    expires: now + self.window,
                });
                self.pending += 1;
                if self.pending > self.max_pending {
                    self.release_oldest_pending();
                }
            }
            (EventKind::Created | EventKind::MovedIn, Some(key)) => {
                if !self.complete_pair(&key, &event) {
                    self.queue.push_back(Slot::Ready(event));
                }
            }
            _ => self.queue.push_back(Slot::Ready(event)),
        }

        self.drain(now)
    }

    /// Release pending entries whose window has elapsed
    pub fn expire(&mut self, now: Instant) -> Batch {
        self.drain(now)
    }

    /// Release everything, unmatched entries standalone
    pub fn flush(&mut self) -> Batch {
        self.pending = 0;
        self.queue
            .drain(..)
            .map(|slot| match slot {
                Slot::Ready(event) | Slot::Pending { event, .. } => event,
            })
            .collect()
    }

    /// When the oldest pending entry expires
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.iter().find_map(|slot| match slot {
            Slot::Pending { expires, .. } => Some(*expires),
            Slot::Ready(_) => None,
        })
    }

    /// Number of unmatched entries waiting for a partner
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Replace the first pending entry with `key` by a RENAMED
    fn complete_pair(&mut self, key: &K, created: &RawEvent) -> bool {
        let Some(slot) = self.queue.iter_mut().find(
            |slot| matches!(slot, Slot::Pending { key: pending_key, .. } if pending_key == key),
        ) else {
            return false;
        };

        if let Slot::Pending { event, .. } = slot {
            let renamed = RawEvent::with_secondary(
                EventKind::Renamed,
                event.primary_path.clone(),
                created.primary_path.clone(),
                event.timestamp,
            );
            tracing::trace!("Paired move {}", renamed);
            *slot = Slot::Ready(renamed);
            self.pending -= 1;
        }
        true
    }

    fn release_oldest_pending(&mut self) {
        if let Some(slot) = self
            .queue
            .iter_mut()
            .find(|slot| matches!(slot, Slot::Pending { .. }))
        {
            if let Slot::Pending { event, .. } = slot {
                tracing::debug!(
                    "Move buffer full, releasing {} unpaired",
                    event.primary_path.display()
                );
                *slot = Slot::Ready(event.clone());
                self.pending -= 1;
            }
        }
    }

    fn drain(&mut self, now: Instant) -> Batch {
        let mut out = Batch::new();
        while let Some(front) = self.queue.front() {
            match front {
                Slot::Ready(_) => {}
                Slot::Pending { expires, .. } if *expires <= now => {}
                Slot::Pending { .. } => break,
            }
            match self.queue.pop_front() {
                Some(Slot::Ready(event)) => out.push(event),
                Some(Slot::Pending { event, .. }) => {
                    self.pending -= 1;
                    out.push(event);
                }
                None => break,
            }
        }
        out
    }
}
