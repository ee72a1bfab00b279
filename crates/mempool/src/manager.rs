//! Pool manager: creation, routing, allocation and accounting.

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use emx_core::config::{MEMPOOL_MAX_BLOCKS, MEMPOOL_MAX_POOLS, MEMPOOL_MAX_SIZE};
use emx_core::osal::Mutex;
use emx_core::{Error, Result};

use crate::stats::{GlobalStats, PoolHealth, PoolStats};

/// Magic word stamped into every live pool, checked on handle validation.
const POOL_MAGIC: u32 = 0x4C4F_4F50;

/// Sentinel in the size→pool table for "no pool covers this size".
const INVALID_INDEX: u8 = 0xFF;

/// Longest pool name kept; longer names are truncated.
const NAME_MAX_LEN: usize = 16;

/// Ceiling on per-allocation lock acquisition.
const ALLOC_LOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Alignment of every pool's backing memory.
const BLOCK_ALIGN: usize = 8;

/// Pool creation parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub block_size: usize,
    pub block_count: usize,
    /// Pool name for diagnostics; auto-generated (`pool_N`) when `None`.
    pub name: Option<String>,
}

impl PoolConfig {
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            block_size,
            block_count,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn is_valid(&self) -> bool {
        self.block_size != 0
            && self.block_size <= MEMPOOL_MAX_SIZE
            && self.block_count != 0
            && self.block_count <= MEMPOOL_MAX_BLOCKS
    }
}

/// Opaque handle to a live pool.
///
/// Stays a valid identifier until the pool is destroyed; operations on a
/// stale handle fail with [`Error::InvalidParam`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle {
    index: u8,
}

/// Static description of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolInfo {
    pub block_size: usize,
    pub block_count: usize,
    pub name: String,
}

/// A live pool: one contiguous heap allocation carved into equal blocks.
///
/// Bit *i* of the combined free mask is 1 iff block *i* is free. All fields
/// are guarded by the owning slot's mutex.
struct Pool {
    magic: u32,
    block_size: usize,
    block_count: usize,
    name: String,
    base: NonNull<u8>,
    free_mask_low: u32,
    free_mask_high: u32,
    alloc_hint: usize,
    total_allocations: u32,
    total_deallocations: u32,
    current_used: u32,
    peak_used: u32,
}

// Safety: the backing memory is owned exclusively by the pool and every
// access to the bookkeeping goes through the slot mutex; handed-out blocks
// are raw bytes whose lifetime the caller manages via `free`.
unsafe impl Send for Pool {}

impl Pool {
    fn create(config: &PoolConfig, auto_index: u8) -> Result<Self> {
        let total = config.block_size * config.block_count;
        let layout =
            Layout::from_size_align(total, BLOCK_ALIGN).map_err(|_| Error::InvalidParam)?;
        // Host-heap backing, released in Drop.
        let base = NonNull::new(unsafe { alloc(layout) }).ok_or(Error::NoMemory)?;

        let (mask_low, mask_high) = initial_masks(config.block_count);
        let mut name = match &config.name {
            Some(name) => name.clone(),
            None => format!("pool_{auto_index}"),
        };
        name.truncate(NAME_MAX_LEN);

        Ok(Self {
            magic: POOL_MAGIC,
            block_size: config.block_size,
            block_count: config.block_count,
            name,
            base,
            free_mask_low: mask_low,
            free_mask_high: mask_high,
            alloc_hint: 0,
            total_allocations: 0,
            total_deallocations: 0,
            current_used: 0,
            peak_used: 0,
        })
    }

    fn is_block_free(&self, index: usize) -> bool {
        if index < 32 {
            self.free_mask_low & (1 << index) != 0
        } else {
            self.free_mask_high & (1 << (index - 32)) != 0
        }
    }

    fn mark_block_used(&mut self, index: usize) {
        if index < 32 {
            self.free_mask_low &= !(1 << index);
        } else {
            self.free_mask_high &= !(1 << (index - 32));
        }
    }

    fn mark_block_free(&mut self, index: usize) {
        if index < 32 {
            self.free_mask_low |= 1 << index;
        } else {
            self.free_mask_high |= 1 << (index - 32);
        }
    }

    /// First free block at or after the allocation hint, wrapping once.
    fn find_free_block(&self) -> Option<usize> {
        (0..self.block_count)
            .map(|step| (self.alloc_hint + step) % self.block_count)
            .find(|&index| self.is_block_free(index))
    }

    fn block_address(&self, index: usize) -> NonNull<u8> {
        // In-bounds by construction: index < block_count.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.block_size)) }
    }

    /// Block index owning `ptr`, if `ptr` lies on a block boundary inside
    /// this pool's range.
    fn block_index(&self, ptr: *const u8) -> Result<usize> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        let total = self.block_size * self.block_count;
        if addr < base || addr >= base + total {
            return Err(Error::NotFound);
        }
        let offset = addr - base;
        if offset % self.block_size != 0 {
            return Err(Error::InvalidParam);
        }
        Ok(offset / self.block_size)
    }

    fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.block_size * self.block_count
    }

    fn utilization_percent(&self) -> u32 {
        self.current_used * 100 / self.block_count as u32
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let total = self.block_size * self.block_count;
        let layout = Layout::from_size_align(total, BLOCK_ALIGN).expect("validated at create");
        unsafe { dealloc(self.base.as_ptr(), layout) };
    }
}

fn initial_masks(block_count: usize) -> (u32, u32) {
    if block_count <= 32 {
        let low = if block_count == 32 {
            u32::MAX
        } else {
            (1u32 << block_count) - 1
        };
        (low, 0)
    } else {
        let remaining = block_count - 32;
        let high = if remaining >= 32 {
            u32::MAX
        } else {
            (1u32 << remaining) - 1
        };
        (u32::MAX, high)
    }
}

/// One manager slot; the failure/fragmentation counters live outside the
/// mutex so the allocation path can record them without holding it.
struct Slot {
    pool: Mutex<Option<Pool>>,
    allocation_failures: AtomicU32,
    fragmentation_count: AtomicU32,
}

impl Slot {
    fn new() -> Self {
        Self {
            pool: Mutex::new(None),
            allocation_failures: AtomicU32::new(0),
            fragmentation_count: AtomicU32::new(0),
        }
    }
}

struct ManagerState {
    pool_count: u8,
    /// `size_map[size]` is the slot index of the smallest active pool whose
    /// block size covers `size`, or `INVALID_INDEX`.
    size_map: Box<[u8]>,
}

/// Manager of up to `MEMPOOL_MAX_POOLS` fixed-block pools.
///
/// Create/destroy and the size→pool map are serialized by the global mutex;
/// each pool has its own mutex for alloc/free. Locking two pools at once is
/// forbidden, and the global mutex is always taken before a pool mutex.
pub struct PoolManager {
    initialized: AtomicBool,
    global: Mutex<ManagerState>,
    slots: [Slot; MEMPOOL_MAX_POOLS],
    global_allocations: AtomicU32,
    global_failures: AtomicU32,
    fragmentation_events: AtomicU32,
}

impl PoolManager {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            global: Mutex::new(ManagerState {
                pool_count: 0,
                size_map: vec![INVALID_INDEX; MEMPOOL_MAX_SIZE + 1].into_boxed_slice(),
            }),
            slots: std::array::from_fn(|_| Slot::new()),
            global_allocations: AtomicU32::new(0),
            global_failures: AtomicU32::new(0),
            fragmentation_events: AtomicU32::new(0),
        }
    }

    /// Brings the manager up with no pools.
    pub fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Err(Error::AlreadyInitialized);
        }

        let mut state = self.global.lock();
        state.pool_count = 0;
        state.size_map.fill(INVALID_INDEX);
        self.global_allocations.store(0, Ordering::Relaxed);
        self.global_failures.store(0, Ordering::Relaxed);
        self.fragmentation_events.store(0, Ordering::Relaxed);
        self.initialized.store(true, Ordering::Release);

        log::info!("memory pool system initialized");
        Ok(())
    }

    /// Destroys every live pool and shuts the manager down. No-op when the
    /// manager is not initialized.
    pub fn deinit(&self) {
        if !self.initialized.load(Ordering::Acquire) {
            return;
        }

        let mut state = self.global.lock();
        for slot in &self.slots {
            slot.pool.lock().take();
            slot.allocation_failures.store(0, Ordering::Relaxed);
            slot.fragmentation_count.store(0, Ordering::Relaxed);
        }
        state.pool_count = 0;
        state.size_map.fill(INVALID_INDEX);
        self.initialized.store(false, Ordering::Release);

        log::info!("memory pool system deinitialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Creates a pool and registers it in the size→pool map.
    pub fn create_pool(&self, config: PoolConfig) -> Result<PoolHandle> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        if !config.is_valid() {
            return Err(Error::InvalidParam);
        }

        let mut state = self.global.lock();

        let index = self
            .slots
            .iter()
            .position(|slot| slot.pool.lock().is_none())
            .ok_or(Error::NoMemory)?;

        let pool = Pool::create(&config, state.pool_count)?;
        log::info!(
            "created pool '{}': {} blocks x {} bytes = {} bytes total",
            pool.name,
            pool.block_count,
            pool.block_size,
            pool.block_count * pool.block_size
        );

        *self.slots[index].pool.lock() = Some(pool);
        self.slots[index].allocation_failures.store(0, Ordering::Relaxed);
        self.slots[index].fragmentation_count.store(0, Ordering::Relaxed);
        state.pool_count += 1;
        self.rebuild_size_map(&mut state);

        Ok(PoolHandle { index: index as u8 })
    }

    /// Destroys a pool, releasing its backing memory.
    pub fn destroy_pool(&self, handle: PoolHandle) -> Result<()> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }
        let slot = self.slot(handle)?;

        let mut state = self.global.lock();
        let mut guard = slot.pool.lock();
        match guard.take() {
            Some(_) => {
                state.pool_count = state.pool_count.saturating_sub(1);
                drop(guard);
                self.rebuild_size_map(&mut state);
                log::info!("pool destroyed");
                Ok(())
            }
            None => Err(Error::InvalidParam),
        }
    }

    /// Allocates one block from a specific pool.
    ///
    /// Bounded: if the pool mutex cannot be taken within 10 ms the attempt
    /// counts as a failure and returns `None` instead of blocking.
    pub fn alloc_from_pool(&self, handle: PoolHandle) -> Option<NonNull<u8>> {
        if !self.is_initialized() {
            return None;
        }
        let slot = self.slot(handle).ok()?;
        self.try_alloc_slot(slot, 0).map(|(ptr, _)| ptr)
    }

    /// Allocates the smallest block covering `size`, preferring the mapped
    /// best-fit pool and sweeping larger pools when it is exhausted.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > MEMPOOL_MAX_SIZE || !self.is_initialized() {
            return None;
        }

        let mapped = {
            let state = self.global.lock();
            state.size_map[size]
        };

        if mapped != INVALID_INDEX {
            let slot = &self.slots[mapped as usize];
            if let Some((ptr, block_size)) = self.try_alloc_slot(slot, size) {
                self.note_fragmentation(slot, block_size, size);
                return Some(ptr);
            }
        }

        // Preferred pool exhausted (or none mapped): sweep every pool large
        // enough, in slot order, under the global mutex.
        let _state = self.global.lock();
        for (index, slot) in self.slots.iter().enumerate() {
            if index == mapped as usize {
                continue;
            }
            if let Some((ptr, block_size)) = self.try_alloc_slot(slot, size) {
                self.note_fragmentation(slot, block_size, size);
                return Some(ptr);
            }
        }

        self.global_failures.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Returns a block to its owning pool.
    ///
    /// A null pointer is accepted and ignored. Pointers that do not belong
    /// to any pool, or are not on a block boundary, fail with
    /// [`Error::InvalidParam`]; freeing an already-free block fails with
    /// [`Error::InvalidState`] and changes nothing.
    pub fn free(&self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        if !self.is_initialized() {
            return Err(Error::InvalidParam);
        }

        for slot in &self.slots {
            let mut guard = slot.pool.lock();
            let Some(pool) = guard.as_mut() else {
                continue;
            };
            if !pool.contains(ptr) {
                continue;
            }

            let index = match pool.block_index(ptr) {
                Ok(index) => index,
                Err(_) => return Err(Error::InvalidParam),
            };
            if pool.is_block_free(index) {
                return Err(Error::InvalidState);
            }

            pool.mark_block_free(index);
            pool.current_used -= 1;
            pool.total_deallocations += 1;
            return Ok(());
        }

        Err(Error::InvalidParam)
    }

    /// True if `ptr` points into any live pool's block range.
    pub fn is_pool_pointer(&self, ptr: *const u8) -> bool {
        if ptr.is_null() || !self.is_initialized() {
            return false;
        }
        self.slots.iter().any(|slot| {
            slot.pool
                .lock()
                .as_ref()
                .is_some_and(|pool| pool.contains(ptr))
        })
    }

    /// Snapshot of a pool's counters.
    pub fn stats(&self, handle: PoolHandle) -> Result<PoolStats> {
        let slot = self.slot(handle)?;
        let guard = slot.pool.lock();
        let pool = guard.as_ref().ok_or(Error::InvalidParam)?;
        Ok(PoolStats {
            total_allocations: pool.total_allocations,
            total_deallocations: pool.total_deallocations,
            current_used: pool.current_used,
            peak_used: pool.peak_used,
            allocation_failures: slot.allocation_failures.load(Ordering::Relaxed),
            fragmentation_count: slot.fragmentation_count.load(Ordering::Relaxed),
            utilization_percent: pool.utilization_percent(),
        })
    }

    /// Snapshot of the manager-wide counters.
    pub fn global_stats(&self) -> Result<GlobalStats> {
        if !self.is_initialized() {
            return Err(Error::NotInitialized);
        }

        let state = self.global.lock();
        let mut total_memory_bytes = 0;
        let mut overall_health = PoolHealth::Good;
        for slot in &self.slots {
            let guard = slot.pool.lock();
            if let Some(pool) = guard.as_ref() {
                total_memory_bytes += pool.block_size * pool.block_count;
                let health = PoolHealth::from_utilization(pool.utilization_percent());
                overall_health = overall_health.max(health);
            }
        }

        Ok(GlobalStats {
            total_pools: state.pool_count,
            global_allocations: self.global_allocations.load(Ordering::Relaxed),
            global_failures: self.global_failures.load(Ordering::Relaxed),
            fragmentation_events: self.fragmentation_events.load(Ordering::Relaxed),
            total_memory_bytes,
            overall_health,
        })
    }

    /// Static description of a pool.
    pub fn info(&self, handle: PoolHandle) -> Result<PoolInfo> {
        let slot = self.slot(handle)?;
        let guard = slot.pool.lock();
        let pool = guard.as_ref().ok_or(Error::InvalidParam)?;
        Ok(PoolInfo {
            block_size: pool.block_size,
            block_count: pool.block_count,
            name: pool.name.clone(),
        })
    }

    /// Utilization-based health of a pool; `Emergency` for a stale handle.
    pub fn check_health(&self, handle: PoolHandle) -> PoolHealth {
        let Ok(slot) = self.slot(handle) else {
            return PoolHealth::Emergency;
        };
        let guard = slot.pool.lock();
        match guard.as_ref() {
            Some(pool) => PoolHealth::from_utilization(pool.utilization_percent()),
            None => PoolHealth::Emergency,
        }
    }

    /// Clears counters on one pool, or on every pool plus the global
    /// counters when `handle` is `None`. `peak_used` restarts from the
    /// current usage.
    pub fn reset_stats(&self, handle: Option<PoolHandle>) -> Result<()> {
        match handle {
            Some(handle) => {
                let slot = self.slot(handle)?;
                let mut guard = slot.pool.lock();
                let pool = guard.as_mut().ok_or(Error::InvalidParam)?;
                reset_pool_stats(pool, slot);
                Ok(())
            }
            None => {
                if !self.is_initialized() {
                    return Err(Error::NotInitialized);
                }
                let _state = self.global.lock();
                for slot in &self.slots {
                    let mut guard = slot.pool.lock();
                    if let Some(pool) = guard.as_mut() {
                        reset_pool_stats(pool, slot);
                    }
                }
                self.global_allocations.store(0, Ordering::Relaxed);
                self.global_failures.store(0, Ordering::Relaxed);
                self.fragmentation_events.store(0, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn slot(&self, handle: PoolHandle) -> Result<&Slot> {
        let index = handle.index as usize;
        if index >= MEMPOOL_MAX_POOLS || !self.is_initialized() {
            return Err(Error::InvalidParam);
        }
        let slot = &self.slots[index];
        match slot.pool.lock().as_ref() {
            Some(pool) if pool.magic == POOL_MAGIC => Ok(slot),
            _ => Err(Error::InvalidParam),
        }
    }

    /// Attempts one allocation from `slot`, requiring at least `min_size`
    /// byte blocks. Returns the block and the pool's block size.
    fn try_alloc_slot(&self, slot: &Slot, min_size: usize) -> Option<(NonNull<u8>, usize)> {
        let Some(mut guard) = slot.pool.try_lock_for(ALLOC_LOCK_TIMEOUT) else {
            slot.allocation_failures.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let pool = guard.as_mut()?;
        if pool.block_size < min_size {
            return None;
        }

        let Some(index) = pool.find_free_block() else {
            slot.allocation_failures.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        pool.mark_block_used(index);
        pool.current_used += 1;
        pool.total_allocations += 1;
        if pool.current_used > pool.peak_used {
            pool.peak_used = pool.current_used;
        }
        pool.alloc_hint = (index + 1) % pool.block_count;

        let ptr = pool.block_address(index);
        let block_size = pool.block_size;
        drop(guard);

        self.global_allocations.fetch_add(1, Ordering::Relaxed);
        Some((ptr, block_size))
    }

    fn note_fragmentation(&self, slot: &Slot, block_size: usize, requested: usize) {
        if block_size > requested {
            slot.fragmentation_count.fetch_add(1, Ordering::Relaxed);
            self.fragmentation_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Recomputes the best-fit table; caller holds the global mutex.
    fn rebuild_size_map(&self, state: &mut ManagerState) {
        let mut block_sizes = [None; MEMPOOL_MAX_POOLS];
        for (index, slot) in self.slots.iter().enumerate() {
            block_sizes[index] = slot.pool.lock().as_ref().map(|pool| pool.block_size);
        }

        state.size_map.fill(INVALID_INDEX);
        for size in 1..=MEMPOOL_MAX_SIZE {
            let best = block_sizes
                .iter()
                .enumerate()
                .filter_map(|(index, &bs)| bs.filter(|&bs| bs >= size).map(|bs| (index, bs)))
                .min_by_key(|&(_, bs)| bs);
            if let Some((index, _)) = best {
                state.size_map[size] = index as u8;
            }
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

fn reset_pool_stats(pool: &mut Pool, slot: &Slot) {
    pool.total_allocations = 0;
    pool.total_deallocations = 0;
    pool.peak_used = pool.current_used;
    slot.allocation_failures.store(0, Ordering::Relaxed);
    slot.fragmentation_count.store(0, Ordering::Relaxed);
}
