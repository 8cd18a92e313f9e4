//! Monotonic clock collaborator

use std::time::Instant;

/// Source of monotonic time for event timestamps and timer deadlines
///
/// Pipeline timers sleep on tokio time, so an implementation must advance
/// with the process clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
