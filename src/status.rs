//! Event loop status codes.
//!
//! Recoverable state errors are `EventLoopError`; the C boundary sees them as
//! `EventLoopStatus`.

/// Status codes returned across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopStatus {
    Ok = 0,
    AlreadyRunning = 1,
    PostShutdown = 2,
    WrongThread = 3,
    NotRunning = 4,
    OtherError = 5,
}

/// Why an event loop operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventLoopError {
    #[error("event loop is already running")]
    AlreadyRunning,

    #[error("event loop has been shut down")]
    PostShutdown,

    #[error("event loop is bound to a different thread")]
    WrongThread,

    #[error("event loop is not running")]
    NotRunning,

    #[error("native event loop exited with code {0}")]
    Abnormal(i32),
}

impl EventLoopError {
    pub fn status(&self) -> EventLoopStatus {
        match self {
            EventLoopError::AlreadyRunning => EventLoopStatus::AlreadyRunning,
            EventLoopError::PostShutdown => EventLoopStatus::PostShutdown,
            EventLoopError::WrongThread => EventLoopStatus::WrongThread,
            EventLoopError::NotRunning => EventLoopStatus::NotRunning,
            EventLoopError::Abnormal(_) => EventLoopStatus::OtherError,
        }
    }
}

impl From<Result<(), EventLoopError>> for EventLoopStatus {
    fn from(result: Result<(), EventLoopError>) -> Self {
        match result {
            Ok(()) => EventLoopStatus::Ok,
            Err(e) => e.status(),
        }
    }
}
