#![doc = r#"# emx-core

Foundation crate for the emx middleware: the unified status taxonomy shared
by every subsystem, the assertion surface, compile-time configuration, and a
small OS abstraction layer (`osal`) providing mutexes, bounded queues and
worker tasks with a millisecond-timeout convention.

## Module Overview
- [`status`] – Status codes returned by all fallible operations.
- [`check`]  – Compile-time, debug and always-on assertions.
- [`config`] – Compile-time resource caps with validated bounds.
- [`osal`]   – Mutex, queue, task and time services for the host scheduler.

The crate keeps no global state apart from the installable assertion handler;
subsystems built on top of it are owner-root objects created once at startup.
"#]

pub mod check;
pub mod config;
pub mod osal;
pub mod status;

pub use status::{Error, Result};
pub use osal::{NO_WAIT, WAIT_FOREVER};
