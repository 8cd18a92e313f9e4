//! Per-path rate limiting of CHANGED events
//!
//! The first CHANGED of a burst goes out immediately; the rest are swallowed
//! until the path has been quiet for a full window, at which point a single
//! CHANGES_DONE_HINT is synthesized. Creates, deletes and moves are never held.

use crate::pairing::Batch;
use fsmon_core::{EventKind, RawEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Coalescer state of one path (absent means idle)
#[derive(Debug, Clone, Copy)]
struct Armed {
    /// When the last CHANGED for this path was forwarded
    last_forwarded: Instant,
    /// When the virtual CHANGES_DONE_HINT fires
    hint_at: Instant,
}

/// Rate limiter for one watch
pub struct RateLimiter {
    window: Duration,
    armed: HashMap<PathBuf, Armed>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed: HashMap::new(),
        }
    }

    /// Change the quiet window; already armed timers keep their deadline
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run one event through the state machine
    pub fn process(&mut self, event: RawEvent, now: Instant) -> Batch {
        let mut out = Batch::new();

        match event.kind {
            EventKind::Changed => {
                let window = self.window;
                match self.armed.get_mut(&event.primary_path) {
                    Some(state) => {
                        state.hint_at = now + window;
                        if now.duration_since(state.last_forwarded) >= window {
                            state.last_forwarded = now;
                            out.push(event);
                        } else {
                            tracing::trace!("Coalesced {}", event);
                        }
                    }
                    None => {
                        self.armed.insert(
                            event.primary_path.clone(),
                            Armed {
                                last_forwarded: now,
                                hint_at: now + window,
                            },
                        );
                        out.push(event);
                    }
                }
            }
            EventKind::ChangesDoneHint => {
                self.disarm(&event.primary_path);
                out.push(event);
            }
            EventKind::Deleted
            | EventKind::MovedOut
            | EventKind::Renamed
            | EventKind::Moved
            | EventKind::Unmount => {
                self.disarm(&event.primary_path);
                out.push(event);
            }
            _ => out.push(event),
        }

        out
    }

    /// Earliest pending hint
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.values().map(|state| state.hint_at).min()
    }

    /// Emit CHANGES_DONE_HINT for every path whose quiet window has elapsed
    pub fn fire_expired(&mut self, now: Instant) -> Batch {
        let mut due: Vec<(Instant, PathBuf)> = self
            .armed
            .iter()
            .filter(|(_, state)| state.hint_at <= now)
            .map(|(path, state)| (state.hint_at, path.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .map(|(_, path)| {
                self.armed.remove(&path);
                RawEvent::new(EventKind::ChangesDoneHint, path, now)
            })
            .collect()
    }

    /// Number of paths with a pending hint
    pub fn armed(&self) -> usize {
        self.armed.len()
    }

    /// Drop all timers
    pub fn clear(&mut self) {
        self.armed.clear();
    }

    fn disarm(&mut self, path: &Path) {
        if self.armed.remove(path).is_some() {
            tracing::trace!("Disarmed pending hint for {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    fn changed(path: &str, at: Instant) -> RawEvent {
        RawEvent::new(EventKind::Changed, path, at)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_yields_one_changed_and_one_hint() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        let mut forwarded = Vec::new();
        for i in 0..10 {
            let at = t0 + ms(i * 10);
            forwarded.extend(limiter.process(changed("/d/f", at), at));
        }
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].kind, EventKind::Changed);

        // Timer re-armed by the last write at t0+90ms
        assert_eq!(limiter.next_deadline(), Some(t0 + ms(290)));
        assert!(limiter.fire_expired(t0 + ms(289)).is_empty());

        let hints = limiter.fire_expired(t0 + ms(290));
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].kind, EventKind::ChangesDoneHint);
        assert_eq!(hints[0].primary_path, PathBuf::from("/d/f"));

        assert!(limiter.fire_expired(t0 + ms(1000)).is_empty());
        assert_eq!(limiter.armed(), 0);
    }

    #[test]
    fn test_steady_stream_spaced_by_window() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        let mut forwarded_at = Vec::new();
        for i in 0..=50 {
            let at = t0 + ms(i * 20);
            if !limiter.process(changed("/d/f", at), at).is_empty() {
                forwarded_at.push(at);
            }
        }

        assert!(forwarded_at.len() > 1);
        for pair in forwarded_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= WINDOW);
        }
        assert!(limiter.fire_expired(t0 + ms(1000)).is_empty());
    }

    #[test]
    fn test_delete_cancels_pending_hint() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        limiter.process(changed("/d/f", t0), t0);
        let out = limiter.process(RawEvent::new(EventKind::Deleted, "/d/f", t0 + ms(10)), t0 + ms(10));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::Deleted);

        assert_eq!(limiter.next_deadline(), None);
        assert!(limiter.fire_expired(t0 + ms(500)).is_empty());
    }

    #[test]
    fn test_native_hint_disarms_virtual_one() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        limiter.process(changed("/d/f", t0), t0);
        let out = limiter.process(
            RawEvent::new(EventKind::ChangesDoneHint, "/d/f", t0 + ms(5)),
            t0 + ms(5),
        );
        assert_eq!(out.len(), 1);
        assert!(limiter.fire_expired(t0 + ms(500)).is_empty());
    }

    #[test]
    fn test_structural_events_pass_untouched() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        for kind in [EventKind::Created, EventKind::AttributeChanged, EventKind::MovedIn] {
            let out = limiter.process(RawEvent::new(kind, "/d/f", t0), t0);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].kind, kind);
        }
        assert_eq!(limiter.armed(), 0);
    }

    #[test]
    fn test_paths_are_independent() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);

        assert_eq!(limiter.process(changed("/d/a", t0), t0).len(), 1);
        assert_eq!(limiter.process(changed("/d/b", t0 + ms(1)), t0 + ms(1)).len(), 1);

        let hints = limiter.fire_expired(t0 + ms(300));
        let paths: Vec<_> = hints.iter().map(|e| e.primary_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("/d/a"), PathBuf::from("/d/b")]);
    }

    #[test]
    fn test_atomic_replace_sequence() {
        // First save writes F directly, second saves through tmp and renames over F
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);
        let mut seen = Vec::new();

        seen.extend(limiter.process(RawEvent::new(EventKind::Created, "/d/F", t0), t0));
        seen.extend(limiter.process(changed("/d/F", t0 + ms(1)), t0 + ms(1)));
        seen.extend(limiter.fire_expired(t0 + ms(250)));
        seen.extend(limiter.process(
            RawEvent::with_secondary(EventKind::Renamed, "/d/tmp", "/d/F", t0 + ms(400)),
            t0 + ms(400),
        ));
        seen.extend(limiter.fire_expired(t0 + ms(1000)));

        let kinds: Vec<_> = seen.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Created,
                EventKind::Changed,
                EventKind::ChangesDoneHint,
                EventKind::Renamed,
            ]
        );
    }

    #[test]
    fn test_set_window_applies_to_next_burst() {
        let t0 = Instant::now();
        let mut limiter = RateLimiter::new(WINDOW);
        limiter.set_window(ms(50));
        assert_eq!(limiter.window(), ms(50));

        limiter.process(changed("/d/f", t0), t0);
        assert_eq!(limiter.next_deadline(), Some(t0 + ms(50)));
        limiter.clear();
        assert_eq!(limiter.next_deadline(), None);
    }
}
