//! OS abstraction layer.
//!
//! Wraps the host scheduler behind the small surface the middleware consumes:
//! mutexes, bounded queues, named tasks and millisecond delays. Everything
//! takes timeouts in milliseconds with the shared convention below; any
//! scheduler providing these semantics satisfies the subsystems built on top.

pub mod queue;
pub mod sync;
pub mod task;

pub use queue::Queue;
pub use sync::{Mutex, MutexGuard};
pub use task::{delay_ms, spawn, tick_ms, Priority, TaskConfig, TaskHandle};

use std::time::Duration;

/// Block indefinitely.
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Do not block at all.
pub const NO_WAIT: u32 = 0;

/// Converts a millisecond timeout to a bounded [`Duration`].
///
/// Returns `None` for [`WAIT_FOREVER`], meaning the caller should wait
/// without a deadline.
pub fn timeout_duration(timeout_ms: u32) -> Option<Duration> {
    if timeout_ms == WAIT_FOREVER {
        None
    } else {
        Some(Duration::from_millis(u64::from(timeout_ms)))
    }
}
