use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// Counter of outstanding units of work.
///
/// Every item handed to a stage is counted with [`add`](WorkCounter::add) before it
/// is enqueued and released with [`done`](WorkCounter::done) once its final side
/// effect has happened. [`wait`](WorkCounter::wait) blocks until the count drops to
/// zero, which is how a pipeline with self-feeding queues knows it has drained.
#[derive(Debug, Default)]
pub struct WorkCounter {
    outstanding: AtomicUsize,
    aborted: AtomicBool,
    lock: Mutex<()>,
    idle: Condvar,
}

impl WorkCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    pub fn done(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "work counter released more often than acquired");
        if previous == 1 {
            self.wake();
        }
    }

    /// Count one unit now and release it when the returned token drops.
    pub fn token(&self) -> WorkToken<'_> {
        self.add(1);
        WorkToken { counter: self }
    }

    /// Wake waiters without the count reaching zero. Used when a fatal error
    /// means the outstanding work will never complete.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Block until all work is done or the counter was aborted.
    ///
    /// Returns `true` when the pipeline drained, `false` when it was aborted.
    pub fn wait(&self) -> bool {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.outstanding() != 0 && !self.is_aborted() {
            guard = self.idle.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        !self.is_aborted()
    }

    // Notify under the lock so a waiter between its check and its wait can't miss it.
    fn wake(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle.notify_all();
    }
}

/// A single unit of work, released on drop.
#[must_use = "dropping the token immediately releases the work it counts"]
pub struct WorkToken<'a> {
    counter: &'a WorkCounter,
}

impl Drop for WorkToken<'_> {
    fn drop(&mut self) {
        self.counter.done();
    }
}
