//! Worker-side error types.
//!
//! These errors cover the mechanics of owning an execution context (spawning
//! the thread, handing it work). Failures of the *submitted computation*
//! itself travel through the protocol as [`crate::protocol::WireError`]
//! payloads instead, so the pool can reconstruct them for the caller.

use crate::handle::WorkerId;

/// Unified error type for the taskforge worker crate.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The OS refused to spawn the worker thread.
    #[error("failed to spawn worker thread: {reason}")]
    Spawn { reason: String },

    /// The handle has been terminated and no longer accepts requests.
    #[error("worker {worker_id} has been terminated")]
    Terminated { worker_id: WorkerId },

    /// The worker thread hung up its request channel (it crashed or exited).
    #[error("worker {worker_id} is not accepting requests")]
    Disconnected { worker_id: WorkerId },
}

/// Convenience alias used throughout the worker crate.
pub type Result<T> = std::result::Result<T, WorkerError>;
