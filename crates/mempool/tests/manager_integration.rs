//! Integration tests for the pool manager.

use emx_core::config::MEMPOOL_MAX_SIZE;
use emx_core::Error;
use emx_mempool::{PoolConfig, PoolHandle, PoolManager, PoolHealth};

fn manager_with(pools: &[(usize, usize)]) -> (PoolManager, Vec<PoolHandle>) {
    let manager = PoolManager::new();
    manager.init().expect("init manager");
    let handles = pools
        .iter()
        .map(|&(block_size, block_count)| {
            manager
                .create_pool(PoolConfig::new(block_size, block_count))
                .expect("create pool")
        })
        .collect();
    (manager, handles)
}

#[test]
fn best_fit_routing_counts_fragmentation() {
    let (manager, handles) = manager_with(&[(32, 4), (128, 4), (512, 2)]);

    let ptr = manager.alloc(40).expect("alloc 40 bytes");

    // 40 bytes does not fit the 32 B pool, so the 128 B pool serves it and
    // the oversize grant counts as fragmentation.
    let stats_128 = manager.stats(handles[1]).unwrap();
    assert_eq!(stats_128.current_used, 1);
    assert_eq!(stats_128.fragmentation_count, 1);
    assert_eq!(manager.stats(handles[0]).unwrap().current_used, 0);
    assert_eq!(manager.stats(handles[2]).unwrap().current_used, 0);

    let global = manager.global_stats().unwrap();
    assert_eq!(global.fragmentation_events, 1);
    assert_eq!(global.global_allocations, 1);

    manager.free(ptr.as_ptr()).unwrap();
    manager.deinit();
}

#[test]
fn exact_fit_is_not_fragmentation() {
    let (manager, handles) = manager_with(&[(32, 4), (128, 4)]);

    let ptr = manager.alloc(32).expect("alloc 32 bytes");
    let stats = manager.stats(handles[0]).unwrap();
    assert_eq!(stats.current_used, 1);
    assert_eq!(stats.fragmentation_count, 0);
    assert_eq!(manager.global_stats().unwrap().fragmentation_events, 0);

    manager.free(ptr.as_ptr()).unwrap();
    manager.deinit();
}

#[test]
fn exhausted_pool_falls_back_to_larger_blocks() {
    let (manager, handles) = manager_with(&[(32, 2), (128, 2)]);

    let a = manager.alloc(32).unwrap();
    let b = manager.alloc(32).unwrap();
    // 32 B pool is now full; the next request spills into the 128 B pool.
    let c = manager.alloc(32).unwrap();

    assert_eq!(manager.stats(handles[0]).unwrap().current_used, 2);
    let spill = manager.stats(handles[1]).unwrap();
    assert_eq!(spill.current_used, 1);
    assert_eq!(spill.fragmentation_count, 1);

    for ptr in [a, b, c] {
        manager.free(ptr.as_ptr()).unwrap();
    }
    manager.deinit();
}

#[test]
fn double_free_is_rejected_without_corruption() {
    let (manager, handles) = manager_with(&[(64, 4)]);

    let ptr = manager.alloc(64).unwrap();
    assert_eq!(manager.stats(handles[0]).unwrap().current_used, 1);

    assert!(manager.free(ptr.as_ptr()).is_ok());
    assert!(matches!(
        manager.free(ptr.as_ptr()),
        Err(Error::InvalidState)
    ));

    let stats = manager.stats(handles[0]).unwrap();
    assert_eq!(stats.current_used, 0);
    assert_eq!(stats.total_deallocations, 1);
    manager.deinit();
}

#[test]
fn misaligned_and_foreign_pointers_are_rejected() {
    let (manager, _) = manager_with(&[(64, 4)]);

    let ptr = manager.alloc(64).unwrap();
    let inside = unsafe { ptr.as_ptr().add(1) };
    assert!(matches!(manager.free(inside), Err(Error::InvalidParam)));

    let mut foreign = 0u8;
    let foreign_ptr: *mut u8 = &mut foreign;
    assert!(!manager.is_pool_pointer(foreign_ptr));
    assert!(matches!(manager.free(foreign_ptr), Err(Error::InvalidParam)));

    assert!(manager.is_pool_pointer(ptr.as_ptr()));
    assert!(manager.free(std::ptr::null_mut()).is_ok());

    manager.free(ptr.as_ptr()).unwrap();
    manager.deinit();
}

#[test]
fn sixty_four_block_pool_exercises_both_mask_words() {
    let (manager, handles) = manager_with(&[(16, 64)]);
    let handle = handles[0];

    let blocks: Vec<_> = (0..64)
        .map(|i| manager.alloc_from_pool(handle).unwrap_or_else(|| panic!("block {i}")))
        .collect();

    let stats = manager.stats(handle).unwrap();
    assert_eq!(stats.current_used, 64);
    assert_eq!(stats.peak_used, 64);
    assert_eq!(stats.utilization_percent, 100);

    // 65th allocation fails and is counted.
    assert!(manager.alloc_from_pool(handle).is_none());
    assert_eq!(manager.stats(handle).unwrap().allocation_failures, 1);

    for ptr in &blocks {
        manager.free(ptr.as_ptr()).unwrap();
    }
    let stats = manager.stats(handle).unwrap();
    assert_eq!(stats.current_used, 0);
    assert_eq!(stats.total_allocations, 64);
    assert_eq!(stats.total_deallocations, 64);
    manager.deinit();
}

#[test]
fn size_limits_are_enforced() {
    let (manager, _) = manager_with(&[(MEMPOOL_MAX_SIZE, 2)]);

    assert!(manager.alloc(0).is_none());
    assert!(manager.alloc(MEMPOOL_MAX_SIZE + 1).is_none());

    let ptr = manager.alloc(MEMPOOL_MAX_SIZE).expect("max-size request");
    manager.free(ptr.as_ptr()).unwrap();
    manager.deinit();

    // Without any covering pool the max-size request fails too.
    let (manager, _) = manager_with(&[(64, 4)]);
    assert!(manager.alloc(MEMPOOL_MAX_SIZE).is_none());
    assert_eq!(manager.global_stats().unwrap().global_failures, 1);
    manager.deinit();
}

#[test]
fn alloc_free_round_trip_restores_pool_state() {
    let (manager, handles) = manager_with(&[(128, 8)]);
    let handle = handles[0];
    let before = manager.stats(handle).unwrap();

    let ptr = manager.alloc(128).unwrap();
    manager.free(ptr.as_ptr()).unwrap();

    let after = manager.stats(handle).unwrap();
    assert_eq!(after.current_used, before.current_used);
    assert_eq!(after.allocation_failures, before.allocation_failures);
    assert_eq!(after.fragmentation_count, before.fragmentation_count);
    assert_eq!(after.total_allocations, before.total_allocations + 1);
    assert_eq!(after.total_deallocations, before.total_deallocations + 1);
    assert_eq!(after.peak_used, 1);
    manager.deinit();
}

#[test]
fn allocation_bookkeeping_invariant_holds() {
    let (manager, handles) = manager_with(&[(32, 8)]);
    let handle = handles[0];

    let mut live = Vec::new();
    for round in 0..4 {
        for _ in 0..(round + 2) {
            live.push(manager.alloc_from_pool(handle).unwrap());
        }
        for _ in 0..(round + 1) {
            manager.free(live.pop().unwrap().as_ptr()).unwrap();
        }
        let stats = manager.stats(handle).unwrap();
        assert_eq!(
            stats.total_allocations - stats.total_deallocations,
            stats.current_used
        );
        assert!(stats.peak_used >= stats.current_used);
    }

    for ptr in live {
        manager.free(ptr.as_ptr()).unwrap();
    }
    manager.deinit();
}

#[test]
fn health_thresholds() {
    let (manager, handles) = manager_with(&[(16, 20)]);
    let handle = handles[0];
    assert_eq!(manager.check_health(handle), PoolHealth::Good);

    let mut live = Vec::new();
    for _ in 0..16 {
        live.push(manager.alloc_from_pool(handle).unwrap());
    }
    // 16/20 = 80 %
    assert_eq!(manager.check_health(handle), PoolHealth::Warning);

    for _ in 0..3 {
        live.push(manager.alloc_from_pool(handle).unwrap());
    }
    // 19/20 = 95 %
    assert_eq!(manager.check_health(handle), PoolHealth::Critical);

    for ptr in live {
        manager.free(ptr.as_ptr()).unwrap();
    }

    manager.destroy_pool(handle).unwrap();
    assert_eq!(manager.check_health(handle), PoolHealth::Emergency);
    manager.deinit();
}

#[test]
fn destroy_pool_invalidates_handle_and_remaps() {
    let (manager, handles) = manager_with(&[(32, 4), (128, 4)]);

    manager.destroy_pool(handles[0]).unwrap();
    assert!(matches!(
        manager.destroy_pool(handles[0]),
        Err(Error::InvalidParam)
    ));
    assert!(manager.alloc_from_pool(handles[0]).is_none());

    // Small requests now route to the remaining 128 B pool.
    let ptr = manager.alloc(16).unwrap();
    let stats = manager.stats(handles[1]).unwrap();
    assert_eq!(stats.current_used, 1);
    assert_eq!(stats.fragmentation_count, 1);

    manager.free(ptr.as_ptr()).unwrap();
    manager.deinit();
}

#[test]
fn reset_stats_clears_counters_and_rebases_peak() {
    let (manager, handles) = manager_with(&[(64, 4)]);
    let handle = handles[0];

    let kept = manager.alloc(64).unwrap();
    let dropped = manager.alloc(48).unwrap();
    manager.free(dropped.as_ptr()).unwrap();

    let stats = manager.stats(handle).unwrap();
    assert_eq!(stats.peak_used, 2);
    assert_eq!(stats.fragmentation_count, 1);

    manager.reset_stats(None).unwrap();

    let stats = manager.stats(handle).unwrap();
    assert_eq!(stats.total_allocations, 0);
    assert_eq!(stats.total_deallocations, 0);
    assert_eq!(stats.fragmentation_count, 0);
    assert_eq!(stats.current_used, 1);
    assert_eq!(stats.peak_used, 1);

    let global = manager.global_stats().unwrap();
    assert_eq!(global.global_allocations, 0);
    assert_eq!(global.fragmentation_events, 0);

    manager.free(kept.as_ptr()).unwrap();
    manager.deinit();
}
