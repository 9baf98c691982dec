//! Pool error types.
//!
//! Every failure a caller can observe arrives through the job's ticket as a
//! [`PoolError`]; the pool never throws asynchronously at an unrelated
//! observer. Worker crashes additionally trigger a restart, but that is
//! invisible here beyond the bound job's failure.

use std::time::Duration;

use taskforge_worker::WireError;

/// Unified error type for the taskforge pool.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    // -- Submission-time failures -------------------------------------------
    /// A strict-mode check rejected the submission.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The pool is closing and no longer accepts submissions.
    #[error("pool is closing")]
    Closing,

    // -- Execution-time failures --------------------------------------------
    /// The job's timeout elapsed before the worker answered.
    #[error("job timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The caller's cancellation handle was triggered.
    #[error("job was cancelled")]
    Cancelled,

    /// The worker crashed or exited abnormally while the job was bound to it.
    #[error("worker crashed: {cause}")]
    WorkerCrash { cause: String },

    /// User code failed; kind, message and captured trace are preserved.
    #[error("{kind}: {message}")]
    User {
        kind: String,
        message: String,
        trace: Option<String>,
    },

    // -- Generic ------------------------------------------------------------
    /// Catch-all for unexpected internal errors (e.g. a failed worker
    /// spawn at construction). Prefer a typed variant whenever possible.
    #[error("internal pool error: {0}")]
    Internal(String),
}

impl From<WireError> for PoolError {
    fn from(error: WireError) -> Self {
        Self::User {
            kind: error.kind,
            message: error.message,
            trace: error.trace,
        }
    }
}

/// Convenience alias used throughout the pool crate.
pub type Result<T> = std::result::Result<T, PoolError>;
