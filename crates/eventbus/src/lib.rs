#![doc = r#"# emx-eventbus

Publish/subscribe delivery of identifier-tagged events with optional byte
payloads.

Subscribers live in a fixed-capacity table and choose their delivery mode at
subscription time: `Sync` callbacks run in the publisher's thread while the
bus lock is held; `Async` callbacks are dispatched through the
[`emx_threadpool`] worker pool, with the payload copied into a dispatch
record that prefers the [`emx_mempool`] allocator and falls back to the heap.

Event identifiers pack a 16-bit domain and a 16-bit event number; domain
`0x0000` is the wildcard that matches every published event.
"#]

mod bus;
mod dispatch;
mod id;

pub use bus::{DeliveryMode, EventBus, EventCallback, SubscriberHandle};
pub use id::EventId;
