//! Named worker tasks and time services.

use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::status::{Error, Result};

/// Default stack size for spawned tasks, host-sized.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Task priority levels.
///
/// The host scheduler does not expose thread priorities portably, so the
/// level is carried for configuration parity and diagnostics; a target port
/// maps it onto real scheduler priorities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Idle,
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    Realtime,
}

/// Configuration for spawning a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub name: String,
    pub stack_size: usize,
    pub priority: Priority,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: DEFAULT_STACK_SIZE,
            priority: Priority::Normal,
        }
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Handle to a spawned task.
pub struct TaskHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// The name the task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the task to finish.
    ///
    /// Returns [`Error::Os`] if the task terminated by panicking.
    pub fn join(self) -> Result<()> {
        self.handle.join().map_err(|_| Error::Os)
    }
}

/// Spawns a task running `entry`.
///
/// Name and stack size map directly onto the host thread; see [`Priority`]
/// for the priority caveat.
pub fn spawn<F>(config: TaskConfig, entry: F) -> Result<TaskHandle>
where
    F: FnOnce() + Send + 'static,
{
    let name = config.name.clone();
    thread::Builder::new()
        .name(config.name)
        .stack_size(config.stack_size)
        .spawn(entry)
        .map(|handle| TaskHandle { name, handle })
        .map_err(|err| {
            log::error!("task spawn failed: {err}");
            Error::NoResource
        })
}

/// Suspends the calling task for `delay` milliseconds.
pub fn delay_ms(delay: u32) {
    thread::sleep(Duration::from_millis(u64::from(delay)));
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the time service was first touched.
pub fn tick_ms() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}
