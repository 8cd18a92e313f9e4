//! Owning-context dispatch
//!
//! Finalized events are never handed to a callback from a helper thread. The
//! pipeline posts a job into the watch's owning context, and the job runs
//! whenever that context is iterated.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

/// Unit of work posted into a context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// "Post to owning context" primitive
pub trait Dispatch: Send + Sync {
    /// Queue `job` to run on the context; jobs run in posting order
    fn post(&self, job: Job);
}

/// FIFO job queue iterated by its owner
///
/// The owner calls [`MainContext::iteration`] (or one of the run helpers) from
/// the thread that should see callbacks.
pub struct MainContext {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

/// Cloneable posting side of a [`MainContext`]
#[derive(Clone)]
pub struct ContextHandle {
    tx: Sender<Job>,
}

impl MainContext {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Handle that posts into this context
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run one job, waiting up to `timeout` for it
    ///
    /// Returns true if a job ran.
    pub fn iteration(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Run every job queued right now without waiting
    pub fn dispatch_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(job) => {
                    job();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Run jobs for `duration`
    pub fn run_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return ran;
            }
            if self.iteration(deadline - now) {
                ran += 1;
            }
        }
    }

    /// Run jobs until `done` returns true or `timeout` elapses
    ///
    /// Returns whether `done` became true.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.iteration((deadline - now).min(Duration::from_millis(10)));
        }
    }

    /// Number of queued jobs
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for MainContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch for ContextHandle {
    fn post(&self, job: Job) {
        // The context owns the receiver; a send only fails once it is gone
        if self.tx.send(job).is_err() {
            tracing::trace!("Dropping job posted to a closed context");
        }
    }
}

impl Dispatch for MainContext {
    fn post(&self, job: Job) {
        let _ = self.tx.send(job);
    }
}
