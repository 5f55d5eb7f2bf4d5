//! Error types for Fractile.

use thiserror::Error;

/// Result type alias using Fractile's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Fractile operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The task was superseded by a newer request before it produced a
    /// result. Expected and benign; callers that triggered the
    /// cancellation are expected to swallow it.
    #[error("job canceled")]
    Cancelled,

    /// Pixel buffer allocation failed.
    #[error("pixel buffer allocation failed: {0}")]
    AllocationFailed(String),

    /// Bitmap encoding failed. Workers treat this as transient and retry;
    /// it is never surfaced on a task future.
    #[error("bitmap encoding failed: {0}")]
    EncodeFailed(String),

    /// A worker channel broke its contract (message with no matching task
    /// state, send to a full or closed channel). Indicates a programming
    /// error, not a recoverable condition.
    #[error("worker protocol violation: {0}")]
    Protocol(String),

    /// I/O error (worker thread spawning).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check whether this error is the benign `Cancelled` outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
