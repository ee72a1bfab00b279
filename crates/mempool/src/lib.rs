#![doc = r#"# emx-mempool

Fixed-size block pools with a best-fit routing layer.

A [`PoolManager`] owns up to `MEMPOOL_MAX_POOLS` named pools, each a single
contiguous heap allocation carved into equal blocks tracked by two 32-bit
free masks. [`PoolManager::alloc`] routes a requested size to the smallest
active pool that covers it through a precomputed size→pool table, falling
back to a sweep of larger pools when the preferred one is exhausted.

Allocation from a pool is a bounded operation: the per-pool mutex is taken
with a 10 ms ceiling so the hot path never blocks indefinitely, and global
counters are updated with atomic fetch-and-add instead of a manager-wide
lock.
"#]

mod manager;
mod stats;

pub use manager::{PoolConfig, PoolHandle, PoolInfo, PoolManager};
pub use stats::{GlobalStats, PoolHealth, PoolStats};
