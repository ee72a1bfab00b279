//! Unified status codes.
//!
//! Every fallible operation in the workspace returns [`Result<T>`]; success is
//! the `Ok` arm and errors are drawn from the flat [`Error`] taxonomy below.
//! The groups mirror the subsystems that raise them: parameter validation,
//! resource exhaustion, operation/lifecycle misuse, hardware and
//! communication collaborators, and the scheduler layer.

use thiserror::Error;

/// Result type used throughout the emx workspace.
pub type Result<T> = core::result::Result<T, Error>;

/// Error kinds shared by all subsystems.
///
/// Parameter errors are returned before any side effect. Resource errors are
/// surfaced to the caller; timeouts are always distinguished from hard
/// failures. Lifecycle misuse (`NotInitialized` / `AlreadyInitialized`) is
/// reported, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    // Parameter errors
    #[error("invalid parameter value")]
    InvalidParam,
    #[error("null pointer passed")]
    NullPointer,
    #[error("value out of valid range")]
    InvalidRange,
    #[error("invalid state for operation")]
    InvalidState,

    // Resource errors
    #[error("out of memory")]
    NoMemory,
    #[error("no free resource available")]
    NoResource,
    #[error("resource is busy")]
    Busy,
    #[error("resource is in use")]
    InUse,

    // Operation errors
    #[error("operation timed out")]
    Timeout,
    #[error("operation not supported")]
    NotSupported,
    #[error("feature not implemented")]
    NotImplemented,
    #[error("module not initialized")]
    NotInitialized,
    #[error("module already initialized")]
    AlreadyInitialized,
    #[error("item not found")]
    NotFound,

    // Hardware errors
    #[error("hardware error")]
    Hardware,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device is busy")]
    DeviceBusy,

    // Communication errors
    #[error("communication error")]
    Comm,
    #[error("communication timeout")]
    CommTimeout,
    #[error("CRC error")]
    CommCrc,
    #[error("not acknowledged")]
    CommNack,

    // Scheduler errors
    #[error("OS error")]
    Os,
    #[error("mutex error")]
    MutexError,
    #[error("queue is full")]
    QueueFull,
    #[error("queue is empty")]
    QueueEmpty,
}

impl Error {
    /// Static name of the error kind, for log lines and diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParam => "INVALID_PARAM",
            Self::NullPointer => "NULL_POINTER",
            Self::InvalidRange => "INVALID_RANGE",
            Self::InvalidState => "INVALID_STATE",
            Self::NoMemory => "NO_MEMORY",
            Self::NoResource => "NO_RESOURCE",
            Self::Busy => "BUSY",
            Self::InUse => "IN_USE",
            Self::Timeout => "TIMEOUT",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::NotFound => "NOT_FOUND",
            Self::Hardware => "HARDWARE",
            Self::DeviceNotFound => "DEVICE_NOT_FOUND",
            Self::DeviceBusy => "DEVICE_BUSY",
            Self::Comm => "COMM",
            Self::CommTimeout => "COMM_TIMEOUT",
            Self::CommCrc => "COMM_CRC",
            Self::CommNack => "COMM_NACK",
            Self::Os => "OS",
            Self::MutexError => "MUTEX",
            Self::QueueFull => "QUEUE_FULL",
            Self::QueueEmpty => "QUEUE_EMPTY",
        }
    }

    /// True for `Timeout` and its communication twin; timeouts are retryable
    /// and callers routinely treat them separately from hard errors.
    pub const fn is_timeout(self) -> bool {
        matches!(self, Self::Timeout | Self::CommTimeout)
    }
}
