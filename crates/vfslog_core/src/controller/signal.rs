//! Interruptible waits for the background job.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cancellation and disposal flags plus a condvar that wakes the job as
/// soon as either is raised.
#[derive(Debug, Default)]
pub(crate) struct JobSignal {
    cancelled: AtomicBool,
    disposed: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl JobSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Requests the running pass and the job to stop.
    pub(crate) fn cancel(&self) {
        let _guard = self.lock.lock();
        self.cancelled.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    /// Cancels for good; [`reset`](Self::reset) no longer clears the flag.
    pub(crate) fn dispose(&self) {
        let _guard = self.lock.lock();
        self.disposed.store(true, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    /// Clears a previous cancellation unless disposed.
    pub(crate) fn reset(&self) {
        let _guard = self.lock.lock();
        if !self.is_disposed() {
            self.cancelled.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Sleeps for at most `timeout`. Returns true if cancelled.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.lock.lock();
        while !self.is_cancelled() {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                        break;
                    }
                }
                None => self.condvar.wait(&mut guard),
            }
        }
        self.is_cancelled()
    }
}
