//! The event bus.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use emx_core::config::EVENT_MAX_SUBSCRIBERS;
use emx_core::osal::Mutex;
use emx_core::{Error, Result};
use emx_mempool::PoolManager;
use emx_threadpool::{Priority, ThreadPool};

use crate::dispatch::PayloadBuf;
use crate::id::EventId;

/// Submit timeout for one async dispatch before the delivery is dropped.
const ASYNC_SUBMIT_TIMEOUT_MS: u32 = 100;

/// Subscriber callback.
///
/// Receives the published identifier and the payload: `None` for a bare
/// [`EventBus::publish`], `Some` (possibly empty) for
/// [`EventBus::publish_data`]. For sync subscribers the slice is only valid
/// for the duration of the call; async subscribers receive their own copy.
pub type EventCallback = Arc<dyn Fn(EventId, Option<&[u8]>) + Send + Sync + 'static>;

/// How a subscriber's callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// In the publisher's thread, during the publish call, under the bus
    /// lock. Sync callbacks must not publish; a nested publish fails with
    /// [`Error::Busy`].
    Sync,
    /// On a thread-pool worker, at Normal priority, some time after the
    /// publish call returns.
    Async,
}

/// Opaque subscription identifier, valid until unsubscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberHandle {
    index: usize,
}

struct Subscriber {
    event_id: EventId,
    callback: EventCallback,
    mode: DeliveryMode,
}

struct BusInner {
    subscribers: [Option<Subscriber>; EVENT_MAX_SUBSCRIBERS],
    active_count: u32,
    total_published: u64,
    dropped_deliveries: u64,
}

impl BusInner {
    fn clear(&mut self) {
        self.subscribers = std::array::from_fn(|_| None);
        self.active_count = 0;
        self.total_published = 0;
        self.dropped_deliveries = 0;
    }
}

thread_local! {
    /// Publish nesting depth of the current thread; used to fail fast on
    /// reentrant publish from a sync callback (the bus lock is not
    /// reentrant). Per-thread, so async callbacks publishing from a worker
    /// are unaffected.
    static PUBLISH_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct PublishGuard;

impl PublishGuard {
    fn enter() -> Result<Self> {
        PUBLISH_DEPTH.with(|depth| {
            if depth.get() > 0 {
                return Err(Error::Busy);
            }
            depth.set(depth.get() + 1);
            Ok(Self)
        })
    }
}

impl Drop for PublishGuard {
    fn drop(&mut self) {
        PUBLISH_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Publish/subscribe event bus over a fixed subscriber table.
///
/// One instance per process; constructed against the thread pool that runs
/// async deliveries and, optionally, the pool manager that backs their
/// payload copies.
pub struct EventBus {
    initialized: AtomicBool,
    inner: Mutex<BusInner>,
    thread_pool: Arc<ThreadPool>,
    mem_pool: Option<Arc<PoolManager>>,
}

impl EventBus {
    pub fn new(thread_pool: Arc<ThreadPool>, mem_pool: Option<Arc<PoolManager>>) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            inner: Mutex::new(BusInner {
                subscribers: std::array::from_fn(|_| None),
                active_count: 0,
                total_published: 0,
                dropped_deliveries: 0,
            }),
            thread_pool,
            mem_pool,
        }
    }

    /// Brings the bus up with an empty subscriber table.
    pub fn init(&self) -> Result<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyInitialized);
        }
        self.inner.lock().clear();
        log::info!("event system initialized");
        Ok(())
    }

    /// Drops every subscription and shuts the bus down. No-op when not
    /// initialized.
    pub fn deinit(&self) {
        if !self.is_initialized() {
            return;
        }
        let mut inner = self.inner.lock();
        let published = inner.total_published;
        inner.clear();
        self.initialized.store(false, Ordering::Release);
        log::info!("event system deinitialized (published {published} events)");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Registers `callback` for `event_id`.
    ///
    /// `EventId::WILDCARD` subscribes to every published event. Fails with
    /// [`Error::NoMemory`] once the table is full.
    pub fn subscribe<F>(
        &self,
        event_id: EventId,
        mode: DeliveryMode,
        callback: F,
    ) -> Result<SubscriberHandle>
    where
        F: Fn(EventId, Option<&[u8]>) + Send + Sync + 'static,
    {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let mut inner = self.inner.lock();
        let index = inner
            .subscribers
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoMemory)?;

        inner.subscribers[index] = Some(Subscriber {
            event_id,
            callback: Arc::new(callback),
            mode,
        });
        inner.active_count += 1;

        log::debug!(
            "subscribed to {event_id} ({})",
            if mode == DeliveryMode::Sync { "sync" } else { "async" }
        );
        Ok(SubscriberHandle { index })
    }

    /// Sync-mode convenience wrapper around [`subscribe`](Self::subscribe).
    pub fn subscribe_sync<F>(&self, event_id: EventId, callback: F) -> Result<SubscriberHandle>
    where
        F: Fn(EventId, Option<&[u8]>) + Send + Sync + 'static,
    {
        self.subscribe(event_id, DeliveryMode::Sync, callback)
    }

    /// Async-mode convenience wrapper around [`subscribe`](Self::subscribe).
    pub fn subscribe_async<F>(&self, event_id: EventId, callback: F) -> Result<SubscriberHandle>
    where
        F: Fn(EventId, Option<&[u8]>) + Send + Sync + 'static,
    {
        self.subscribe(event_id, DeliveryMode::Async, callback)
    }

    /// Removes one subscription. The handle must refer to a live slot.
    pub fn unsubscribe(&self, handle: SubscriberHandle) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if handle.index >= EVENT_MAX_SUBSCRIBERS {
            return Err(Error::InvalidParam);
        }

        let mut inner = self.inner.lock();
        match inner.subscribers[handle.index].take() {
            Some(sub) => {
                inner.active_count -= 1;
                log::debug!("unsubscribed from {}", sub.event_id);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Removes every subscription whose id equals `event_id` exactly.
    ///
    /// Wildcard subscribers are only affected when `event_id` is the
    /// wildcard itself. Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, event_id: EventId) -> u32 {
        if !self.is_initialized() {
            return 0;
        }

        let mut inner = self.inner.lock();
        let mut removed = 0;
        for slot in &mut inner.subscribers {
            if slot.as_ref().is_some_and(|sub| sub.event_id == event_id) {
                *slot = None;
                removed += 1;
            }
        }
        inner.active_count -= removed;
        removed
    }

    /// Publishes an event without payload.
    pub fn publish(&self, event_id: EventId) -> Result<()> {
        self.deliver(event_id, None)
    }

    /// Publishes an event with a payload.
    ///
    /// Sync subscribers see the slice directly; async subscribers get a copy
    /// that outlives the call. A zero-length payload is delivered as such.
    pub fn publish_data(&self, event_id: EventId, data: &[u8]) -> Result<()> {
        self.deliver(event_id, Some(data))
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> u32 {
        if !self.is_initialized() {
            return 0;
        }
        self.inner.lock().active_count
    }

    /// Number of subscriptions a publish of `event_id` would reach,
    /// wildcards included.
    pub fn event_subscriber_count(&self, event_id: EventId) -> u32 {
        if !self.is_initialized() {
            return 0;
        }
        self.inner
            .lock()
            .subscribers
            .iter()
            .flatten()
            .filter(|sub| sub.event_id == event_id || sub.event_id.is_wildcard())
            .count() as u32
    }

    /// Total publish calls accepted since init.
    pub fn total_published(&self) -> u64 {
        self.inner.lock().total_published
    }

    /// Async deliveries dropped because the dispatch could not be queued.
    pub fn dropped_deliveries(&self) -> u64 {
        self.inner.lock().dropped_deliveries
    }

    fn deliver(&self, event_id: EventId, payload: Option<&[u8]>) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let _guard = PublishGuard::enter()?;

        let mut inner = self.inner.lock();
        inner.total_published += 1;

        for index in 0..EVENT_MAX_SUBSCRIBERS {
            let Some((sub_id, mode, callback)) = inner.subscribers[index]
                .as_ref()
                .map(|sub| (sub.event_id, sub.mode, Arc::clone(&sub.callback)))
            else {
                continue;
            };
            if sub_id != event_id && !sub_id.is_wildcard() {
                continue;
            }

            match mode {
                DeliveryMode::Sync => callback(event_id, payload),
                DeliveryMode::Async => {
                    if let Err(err) = self.dispatch_async(event_id, callback, payload) {
                        inner.dropped_deliveries += 1;
                        log::warn!("async delivery of {event_id} dropped: {err}");
                    }
                }
            }
        }

        Ok(())
    }

    /// Queues one async delivery carrying its own payload copy. The worker
    /// invokes the callback and the copy is released when the record drops.
    fn dispatch_async(
        &self,
        event_id: EventId,
        callback: EventCallback,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        let buf = payload.map(|data| PayloadBuf::copy_from(data, self.mem_pool.as_ref()));
        self.thread_pool.submit(
            move || callback(event_id, buf.as_ref().map(PayloadBuf::as_slice)),
            Priority::Normal,
            ASYNC_SUBMIT_TIMEOUT_MS,
        )
    }
}
