//! Worker pool implementation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use emx_core::config::{
    THREADPOOL_MAX_THREADS, THREADPOOL_QUEUE_SIZE, THREADPOOL_STACK_SIZE, THREADPOOL_THREAD_COUNT,
};
use emx_core::osal::{self, delay_ms, Mutex, Queue, TaskConfig, TaskHandle};
use emx_core::{Error, Result, NO_WAIT};

/// How long a worker blocks on the Normal queue before re-checking the pool
/// state. Liveness guard for shutdown, not a fairness mechanism.
const NORMAL_POLL_MS: u32 = 100;

/// Poll interval of [`ThreadPool::wait_idle`].
const IDLE_POLL_MS: u32 = 10;

/// How long `deinit(true)` lets queued work drain before shutdown.
const DEINIT_DRAIN_MS: u32 = 5000;

/// Grace period for workers to finish their current call during shutdown.
const SHUTDOWN_GRACE_MS: u32 = 100;

/// Task priority classes, one FIFO queue each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

const QUEUE_COUNT: usize = 4;

impl Priority {
    /// Queue slot in drain order: Critical first, Low last.
    fn queue_index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Stopped,
    Running,
    ShuttingDown,
}

impl PoolState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    fn as_raw(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::ShuttingDown => 2,
        }
    }
}

/// Pool configuration; defaults come from the compile-time caps.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    pub thread_count: usize,
    /// Per-priority queue capacity; the Normal queue holds twice this.
    pub queue_size: usize,
    pub stack_size: usize,
    pub worker_priority: osal::Priority,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            thread_count: THREADPOOL_THREAD_COUNT,
            queue_size: THREADPOOL_QUEUE_SIZE,
            stack_size: THREADPOOL_STACK_SIZE,
            worker_priority: osal::Priority::Normal,
        }
    }
}

impl ThreadPoolConfig {
    fn is_valid(&self) -> bool {
        self.thread_count >= 1
            && self.thread_count <= THREADPOOL_MAX_THREADS
            && self.queue_size > 0
            && self.stack_size > 0
    }
}

/// A queued unit of work.
enum Job {
    Closure(Box<dyn FnOnce() + Send + 'static>),
    /// Allocation-free form used by the ISR submission path.
    Bare(fn()),
}

impl Job {
    fn run(self) {
        match self {
            Self::Closure(job) => job(),
            Self::Bare(func) => func(),
        }
    }
}

#[derive(Default)]
struct Stats {
    active_tasks: u32,
    total_submitted: u64,
    total_completed: u64,
}

/// State shared between the pool handle and its workers for the whole pool
/// lifetime (across init/deinit cycles).
struct Shared {
    state: AtomicU8,
    stats: Mutex<Stats>,
}

impl Shared {
    fn state(&self) -> PoolState {
        PoolState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        self.state.store(state.as_raw(), Ordering::Release);
    }
}

/// Per-initialization resources, dropped on deinit.
struct Inner {
    queues: [Queue<Job>; QUEUE_COUNT],
    workers: Vec<TaskHandle>,
}

/// Priority thread pool.
///
/// Created stopped; [`init`](Self::init) spawns the workers and opens the
/// queues. All methods are callable from any thread.
pub struct ThreadPool {
    shared: Arc<Shared>,
    inner: Mutex<Option<Inner>>,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PoolState::Stopped.as_raw()),
                stats: Mutex::new(Stats::default()),
            }),
            inner: Mutex::new(None),
        }
    }

    /// Initializes with the default configuration.
    pub fn init(&self) -> Result<()> {
        self.init_with_config(ThreadPoolConfig::default())
    }

    /// Creates the queues, transitions to `Running` and spawns the workers.
    ///
    /// Partial failure while spawning unwinds the workers created so far and
    /// leaves the pool uninitialized.
    pub fn init_with_config(&self, config: ThreadPoolConfig) -> Result<()> {
        if !config.is_valid() {
            return Err(Error::InvalidParam);
        }

        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let queues = [
            Queue::new(config.queue_size),
            Queue::new(config.queue_size),
            Queue::new(config.queue_size * 2),
            Queue::new(config.queue_size),
        ];

        *self.shared.stats.lock() = Stats::default();
        self.shared.set_state(PoolState::Running);

        let mut workers = Vec::with_capacity(config.thread_count);
        for id in 0..config.thread_count {
            let task = TaskConfig::new(format!("Worker{id}"))
                .with_stack_size(config.stack_size)
                .with_priority(config.worker_priority);
            let shared = Arc::clone(&self.shared);
            let queues = queues.clone();

            match osal::spawn(task, move || worker_loop(id, shared, queues)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // Unwind: stop the workers spawned so far.
                    self.shared.set_state(PoolState::ShuttingDown);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    self.shared.set_state(PoolState::Stopped);
                    return Err(err);
                }
            }
        }

        *inner = Some(Inner { queues, workers });
        log::info!(
            "thread pool initialized: {} workers, queue size {}",
            config.thread_count,
            config.queue_size
        );
        Ok(())
    }

    /// Shuts the pool down.
    ///
    /// With `wait_for_tasks` the call first lets queued work drain for up to
    /// five seconds. Workers observe `ShuttingDown` between tasks; after a
    /// 100 ms grace period they are joined and the queues destroyed. No-op
    /// on an uninitialized pool.
    pub fn deinit(&self, wait_for_tasks: bool) {
        if self.inner.lock().is_none() {
            return;
        }

        if wait_for_tasks {
            let _ = self.wait_idle(DEINIT_DRAIN_MS);
        }

        self.shared.set_state(PoolState::ShuttingDown);
        delay_ms(SHUTDOWN_GRACE_MS);

        let Some(inner) = self.inner.lock().take() else {
            return;
        };
        for worker in inner.workers {
            let _ = worker.join();
        }
        drop(inner.queues);

        self.shared.set_state(PoolState::Stopped);
        let completed = self.shared.stats.lock().total_completed;
        log::info!("thread pool deinitialized (completed {completed} tasks)");
    }

    /// Submits a task at the given priority, waiting up to `timeout_ms` for
    /// queue space.
    pub fn submit<F>(&self, job: F, priority: Priority, timeout_ms: u32) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.queue(priority)?;
        queue.send(Job::Closure(Box::new(job)), timeout_ms)?;
        self.shared.stats.lock().total_submitted += 1;
        Ok(())
    }

    /// ISR-safe submission: never blocks, never allocates, skips the
    /// statistics mutex.
    ///
    /// Returns the scheduler's higher-priority-task-woken hint, which is
    /// always `false` on the host port.
    pub fn submit_from_isr(&self, func: fn(), priority: Priority) -> Result<bool> {
        let queue = self.queue(priority)?;
        queue.try_send(Job::Bare(func))?;
        Ok(false)
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> u32 {
        self.shared.stats.lock().active_tasks
    }

    /// Number of tasks queued across all four priorities.
    pub fn pending_count(&self) -> u32 {
        match self.inner.lock().as_ref() {
            Some(inner) => inner.queues.iter().map(|q| q.len() as u32).sum(),
            None => 0,
        }
    }

    /// True when nothing is executing and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.active_count() == 0 && self.pending_count() == 0
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// Total tasks accepted by [`submit`](Self::submit).
    pub fn total_submitted(&self) -> u64 {
        self.shared.stats.lock().total_submitted
    }

    /// Total tasks whose invocation has finished.
    pub fn total_completed(&self) -> u64 {
        self.shared.stats.lock().total_completed
    }

    /// Polls every 10 ms until the pool is idle or `timeout_ms` elapsed.
    pub fn wait_idle(&self, timeout_ms: u32) -> Result<()> {
        if self.inner.lock().is_none() {
            return Err(Error::NotInitialized);
        }

        let start = Instant::now();
        while !self.is_idle() {
            if timeout_ms != emx_core::WAIT_FOREVER
                && start.elapsed().as_millis() as u32 >= timeout_ms
            {
                return Err(Error::Timeout);
            }
            delay_ms(IDLE_POLL_MS);
        }
        Ok(())
    }

    /// Queue for `priority`, or the lifecycle error barring submission.
    fn queue(&self, priority: Priority) -> Result<Queue<Job>> {
        let inner = self.inner.lock();
        let inner = inner.as_ref().ok_or(Error::NotInitialized)?;
        if self.shared.state() != PoolState::Running {
            return Err(Error::InvalidState);
        }
        Ok(inner.queues[priority.queue_index()].clone())
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.deinit(false);
    }
}

/// Worker routine: strict priority drain until the pool leaves `Running`.
fn worker_loop(id: usize, shared: Arc<Shared>, queues: [Queue<Job>; QUEUE_COUNT]) {
    log::debug!("worker {id} started");

    while shared.state() == PoolState::Running {
        let job = queues[0]
            .recv(NO_WAIT)
            .or_else(|_| queues[1].recv(NO_WAIT))
            // Bounded block so shutdown is observed within one poll period.
            .or_else(|_| queues[2].recv(NORMAL_POLL_MS))
            .or_else(|_| queues[3].recv(NO_WAIT));

        let Ok(job) = job else {
            continue;
        };

        shared.stats.lock().active_tasks += 1;
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run()));
        {
            let mut stats = shared.stats.lock();
            stats.active_tasks -= 1;
            stats.total_completed += 1;
        }
        if outcome.is_err() {
            log::error!("worker {id}: task panicked");
        }
    }

    log::debug!("worker {id} stopped");
}
