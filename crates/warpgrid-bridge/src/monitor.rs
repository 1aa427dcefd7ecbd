//! Mutex + condition variable pair guarding one adapter's state.
//!
//! Every stateful bridge keeps all of its mutable fields behind a single
//! [`Monitor`]. Blocking operations take the lock, check their predicate,
//! and call [`Monitor::wait`] in a loop until the predicate holds. Wakers
//! mutate the state under the lock and then call [`Monitor::notify_all`].
//!
//! Lock poisoning is recovered rather than propagated: a handler panicking
//! on another thread must not turn every later `read` into a panic, and
//! no critical section in this crate leaves the state half-updated.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

pub(crate) struct Monitor<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T> Monitor<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            cond: Condvar::new(),
        }
    }

    /// Acquire the state lock.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release the lock, sleep until notified, and re-acquire it.
    ///
    /// Wakeups may be spurious; callers must re-check their predicate.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every thread blocked in [`Monitor::wait`].
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
