//! Compile-time configuration.
//!
//! Every resource cap in the workspace is a compile-time constant collected
//! here, with bounds enforced at build time. There is no runtime
//! configuration surface; deployments that need different caps rebuild.

use crate::const_assert;

/// Maximum number of concurrently registered event subscribers.
pub const EVENT_MAX_SUBSCRIBERS: usize = 32;

/// Default number of thread-pool workers.
pub const THREADPOOL_THREAD_COUNT: usize = 4;

/// Hard ceiling on thread-pool workers.
pub const THREADPOOL_MAX_THREADS: usize = 16;

/// Default per-priority queue capacity (the Normal queue doubles this).
pub const THREADPOOL_QUEUE_SIZE: usize = 20;

/// Default worker stack size in bytes (host-sized; targets tune this down).
pub const THREADPOOL_STACK_SIZE: usize = 64 * 1024;

/// Maximum number of simultaneously live memory pools.
pub const MEMPOOL_MAX_POOLS: usize = 8;

/// Maximum blocks per pool; bounded by the two 32-bit free masks.
pub const MEMPOOL_MAX_BLOCKS: usize = 64;

/// Largest block size (and largest smart-alloc request) in bytes.
pub const MEMPOOL_MAX_SIZE: usize = 2048;

const_assert!(
    EVENT_MAX_SUBSCRIBERS >= 4 && EVENT_MAX_SUBSCRIBERS <= 64,
    "EVENT_MAX_SUBSCRIBERS out of range (4..=64)"
);
const_assert!(
    THREADPOOL_THREAD_COUNT >= 1 && THREADPOOL_THREAD_COUNT <= THREADPOOL_MAX_THREADS,
    "THREADPOOL_THREAD_COUNT out of range (1..=16)"
);
const_assert!(THREADPOOL_QUEUE_SIZE > 0, "queue capacity must be non-zero");
const_assert!(THREADPOOL_STACK_SIZE > 0, "stack size must be non-zero");
const_assert!(MEMPOOL_MAX_POOLS > 0 && MEMPOOL_MAX_POOLS < 0xFF);
const_assert!(
    MEMPOOL_MAX_BLOCKS <= 64,
    "free masks cover at most 64 blocks per pool"
);
const_assert!(MEMPOOL_MAX_SIZE > 0);
