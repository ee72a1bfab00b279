//! Bounded FIFO queues with millisecond timeouts.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::status::{Error, Result};

use super::{timeout_duration, NO_WAIT};

struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Bounded multi-producer multi-consumer FIFO.
///
/// Storage is fully pre-allocated at creation, so [`Queue::try_send`] never
/// allocates and is safe to call from contexts that must not touch the
/// allocator. Handles are cheap to clone and share one queue.
pub struct Queue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Queue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    capacity,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().expect("queue mutex poisoned")
    }

    /// Sends an item, waiting up to `timeout_ms` for space.
    ///
    /// Returns [`Error::QueueFull`] when the queue is full and `timeout_ms`
    /// is [`NO_WAIT`], [`Error::Timeout`] when the wait expired.
    pub fn send(&self, item: T, timeout_ms: u32) -> Result<()> {
        let deadline = timeout_duration(timeout_ms).map(|d| Instant::now() + d);
        let mut state = self.lock();

        while state.items.len() >= state.capacity {
            if timeout_ms == NO_WAIT {
                return Err(Error::QueueFull);
            }
            state = match deadline {
                None => self
                    .inner
                    .not_full
                    .wait(state)
                    .expect("queue mutex poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.inner
                        .not_full
                        .wait_timeout(state, deadline - now)
                        .expect("queue mutex poisoned")
                        .0
                }
            };
        }

        state.items.push_back(item);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking send that performs no allocation.
    ///
    /// The only send allowed from interrupt context: it never waits for
    /// space and fails with [`Error::QueueFull`] instead.
    pub fn try_send(&self, item: T) -> Result<()> {
        self.send(item, NO_WAIT)
    }

    /// Receives an item, waiting up to `timeout_ms` for one to arrive.
    ///
    /// Returns [`Error::QueueEmpty`] when empty and `timeout_ms` is
    /// [`NO_WAIT`], [`Error::Timeout`] when the wait expired.
    pub fn recv(&self, timeout_ms: u32) -> Result<T> {
        let deadline = timeout_duration(timeout_ms).map(|d| Instant::now() + d);
        let mut state = self.lock();

        while state.items.is_empty() {
            if timeout_ms == NO_WAIT {
                return Err(Error::QueueEmpty);
            }
            state = match deadline {
                None => self
                    .inner
                    .not_empty
                    .wait(state)
                    .expect("queue mutex poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.inner
                        .not_empty
                        .wait_timeout(state, deadline - now)
                        .expect("queue mutex poisoned")
                        .0
                }
            };
        }

        let item = state.items.pop_front().expect("checked non-empty");
        self.inner.not_full.notify_one();
        Ok(item)
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Remaining free slots.
    pub fn available(&self) -> usize {
        let state = self.lock();
        state.capacity - state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let state = self.lock();
        state.items.len() >= state.capacity
    }

    /// Discards all queued items.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.items.clear();
        self.inner.not_full.notify_all();
    }

    /// Maximum number of items the queue can hold.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
