//! Assertion and verification surface.
//!
//! Three tiers, mirroring the usual embedded split:
//!
//! - [`const_assert!`] – compile-time, for configuration bounds.
//! - [`debug_check!`]  – active only under `debug_assertions`.
//! - [`verify!`]       – always on, cannot be compiled out.
//!
//! A failed check reports `(file, line, expression)` through the installed
//! [`FailureHandler`], if any. The handler is expected not to return; if it
//! does (or none is installed) the process panics, which is the host
//! equivalent of halting the target.

use std::sync::Mutex;

/// Callback invoked on a failed `verify!`/`debug_check!`.
pub type FailureHandler = fn(file: &str, line: u32, expr: &str);

static HANDLER: Mutex<Option<FailureHandler>> = Mutex::new(None);

/// Installs (or clears, with `None`) the process-wide failure handler.
pub fn set_failure_handler(handler: Option<FailureHandler>) {
    *HANDLER.lock().expect("handler slot poisoned") = handler;
}

/// Reports a failed check and does not return.
///
/// Called by the assertion macros; not meant to be invoked directly.
pub fn failure(file: &str, line: u32, expr: &str) -> ! {
    let handler = *HANDLER.lock().expect("handler slot poisoned");
    if let Some(handler) = handler {
        handler(file, line, expr);
    }
    panic!("verification failed at {file}:{line}: {expr}");
}

/// Compile-time assertion; a false condition is a build error.
#[macro_export]
macro_rules! const_assert {
    ($cond:expr $(,)?) => {
        const _: () = assert!($cond);
    };
    ($cond:expr, $msg:expr $(,)?) => {
        const _: () = assert!($cond, $msg);
    };
}

/// Always-on runtime verification.
#[macro_export]
macro_rules! verify {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::check::failure(file!(), line!(), stringify!($cond));
        }
    };
    ($cond:expr, $msg:expr $(,)?) => {
        if !$cond {
            $crate::check::failure(file!(), line!(), $msg);
        }
    };
}

/// Debug-only check; compiled out in release builds.
#[macro_export]
macro_rules! debug_check {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::verify!($($arg)*);
        }
    };
}
