//! Integration tests exercising the pool end to end.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use emx_core::osal::delay_ms;
use emx_core::{Error, NO_WAIT, WAIT_FOREVER};
use emx_threadpool::{PoolState, Priority, ThreadPool, ThreadPoolConfig};

fn small_pool(thread_count: usize, queue_size: usize) -> ThreadPool {
    let pool = ThreadPool::new();
    pool.init_with_config(ThreadPoolConfig {
        thread_count,
        queue_size,
        stack_size: 64 * 1024,
        ..ThreadPoolConfig::default()
    })
    .expect("init pool");
    pool
}

#[test]
fn lifecycle_states() {
    let pool = ThreadPool::new();
    assert_eq!(pool.state(), PoolState::Stopped);
    assert!(matches!(
        pool.submit(|| {}, Priority::Normal, NO_WAIT),
        Err(Error::NotInitialized)
    ));
    assert!(matches!(pool.wait_idle(10), Err(Error::NotInitialized)));

    pool.init().expect("init");
    assert_eq!(pool.state(), PoolState::Running);
    assert!(matches!(pool.init(), Err(Error::AlreadyInitialized)));

    pool.deinit(false);
    assert_eq!(pool.state(), PoolState::Stopped);
    assert!(matches!(
        pool.submit(|| {}, Priority::Normal, NO_WAIT),
        Err(Error::NotInitialized)
    ));
}

#[test]
fn strict_priority_drain_order() {
    let pool = small_pool(1, 4);
    let order = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    // A occupies the single worker while B and C queue up behind it.
    let order_a = Arc::clone(&order);
    pool.submit(
        move || {
            order_a.lock().unwrap().push("A");
            gate_rx.recv().unwrap();
        },
        Priority::Low,
        NO_WAIT,
    )
    .unwrap();

    // Let the worker pick A up before queueing the rest; it may spend up to
    // one Normal-queue poll period before reaching the Low queue.
    delay_ms(250);
    assert_eq!(pool.active_count(), 1);

    let order_b = Arc::clone(&order);
    pool.submit(move || order_b.lock().unwrap().push("B"), Priority::High, NO_WAIT)
        .unwrap();
    let order_c = Arc::clone(&order);
    pool.submit(move || order_c.lock().unwrap().push("C"), Priority::Critical, NO_WAIT)
        .unwrap();
    assert_eq!(pool.pending_count(), 2);

    gate_tx.send(()).unwrap();
    pool.wait_idle(1000).expect("drain");

    // Critical overtakes High even though it was submitted later.
    assert_eq!(*order.lock().unwrap(), vec!["A", "C", "B"]);
    pool.deinit(false);
}

#[test]
fn shutdown_drains_all_submitted_tasks() {
    let pool = small_pool(4, 30);
    let completed = Arc::new(AtomicU32::new(0));

    for _ in 0..50 {
        let completed = Arc::clone(&completed);
        pool.submit(
            move || {
                delay_ms(20);
                completed.fetch_add(1, Ordering::SeqCst);
            },
            Priority::Normal,
            WAIT_FOREVER,
        )
        .unwrap();
    }

    let start = Instant::now();
    pool.deinit(true);
    assert!(start.elapsed() < Duration::from_secs(6));

    assert_eq!(completed.load(Ordering::SeqCst), 50);
    assert_eq!(pool.total_submitted(), 50);
    assert_eq!(pool.total_completed(), 50);
    assert_eq!(pool.state(), PoolState::Stopped);
}

#[test]
fn wait_idle_times_out_while_busy() {
    let pool = small_pool(1, 4);

    pool.submit(|| delay_ms(150), Priority::Normal, NO_WAIT).unwrap();
    assert!(matches!(pool.wait_idle(20), Err(Error::Timeout)));

    pool.wait_idle(2000).expect("eventually idle");
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.pending_count(), 0);
    pool.deinit(false);
}

#[test]
fn saturated_queue_reports_backpressure() {
    let pool = small_pool(1, 1);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    pool.submit(move || gate_rx.recv().unwrap(), Priority::Low, NO_WAIT)
        .unwrap();
    delay_ms(250); // worker is now parked inside the gate task

    // Low queue capacity is 1: first queued task fits, second does not.
    pool.submit(|| {}, Priority::Low, NO_WAIT).unwrap();
    assert!(matches!(
        pool.submit(|| {}, Priority::Low, NO_WAIT),
        Err(Error::QueueFull)
    ));
    assert!(matches!(
        pool.submit(|| {}, Priority::Low, 30),
        Err(Error::Timeout)
    ));

    gate_tx.send(()).unwrap();
    pool.wait_idle(1000).unwrap();
    pool.deinit(false);
}

static ISR_HITS: AtomicU32 = AtomicU32::new(0);

fn isr_task() {
    ISR_HITS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn isr_submission_skips_statistics() {
    let pool = small_pool(2, 4);

    let woken = pool
        .submit_from_isr(isr_task, Priority::Critical)
        .expect("isr submit");
    assert!(!woken);

    pool.wait_idle(1000).unwrap();
    assert_eq!(ISR_HITS.load(Ordering::SeqCst), 1);
    // The ISR path must not touch the statistics mutex.
    assert_eq!(pool.total_submitted(), 0);
    assert_eq!(pool.total_completed(), 1);
    pool.deinit(false);
}

#[test]
fn panicking_task_leaves_counters_consistent() {
    let pool = small_pool(2, 4);
    let survivor = Arc::new(AtomicU32::new(0));

    pool.submit(|| panic!("task fault"), Priority::Normal, NO_WAIT)
        .unwrap();
    let survivor_clone = Arc::clone(&survivor);
    pool.submit(
        move || {
            survivor_clone.fetch_add(1, Ordering::SeqCst);
        },
        Priority::Normal,
        NO_WAIT,
    )
    .unwrap();

    pool.wait_idle(1000).expect("drain after panic");
    assert_eq!(survivor.load(Ordering::SeqCst), 1);
    assert_eq!(pool.total_completed(), 2);
    assert_eq!(pool.active_count(), 0);

    // The pool keeps working after a task fault.
    let survivor_clone = Arc::clone(&survivor);
    pool.submit(
        move || {
            survivor_clone.fetch_add(1, Ordering::SeqCst);
        },
        Priority::High,
        NO_WAIT,
    )
    .unwrap();
    pool.wait_idle(1000).unwrap();
    assert_eq!(survivor.load(Ordering::SeqCst), 2);
    pool.deinit(false);
}

#[test]
fn normal_queue_has_double_capacity() {
    let pool = small_pool(1, 2);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    pool.submit(move || gate_rx.recv().unwrap(), Priority::Critical, NO_WAIT)
        .unwrap();
    delay_ms(250);

    // queue_size = 2, so Normal holds 4 queued tasks where Low holds 2.
    for _ in 0..4 {
        pool.submit(|| {}, Priority::Normal, NO_WAIT).unwrap();
    }
    assert!(matches!(
        pool.submit(|| {}, Priority::Normal, NO_WAIT),
        Err(Error::QueueFull)
    ));

    gate_tx.send(()).unwrap();
    pool.wait_idle(2000).unwrap();
    pool.deinit(false);
}
