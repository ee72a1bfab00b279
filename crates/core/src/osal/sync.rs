//! Mutual exclusion.

use std::time::{Duration, Instant};

pub type MutexGuard<'a, T> = std::sync::MutexGuard<'a, T>;

/// Mutex wrapper with the workspace locking policy.
///
/// Panics if the mutex is poisoned: a panic inside a critical section leaves
/// shared middleware state unrecoverable, the same way a faulted task does on
/// the target.
pub struct Mutex<T> {
    inner: std::sync::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub const fn new(value: T) -> Self {
        Self {
            inner: std::sync::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking until it becomes available.
    ///
    /// # Panics
    ///
    /// Panics if the mutex has been poisoned by a panicking thread.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().expect("mutex poisoned")
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    /// Attempts to acquire the mutex within `timeout`.
    ///
    /// Polls at 1 ms granularity; the allocator uses this to bound lock
    /// acquisition on its hot path instead of blocking indefinitely.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
