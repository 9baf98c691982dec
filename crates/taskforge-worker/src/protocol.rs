//! Request/response envelope between the pool scheduler and a worker.
//!
//! A [`JobRequest`] carries the function payload and its arguments; the
//! worker rehydrates the payload into a callable, invokes it, and posts
//! exactly one [`JobResponse`] whose [`Outcome`] is either a result value or
//! a [`WireError`]. Both envelopes derive serde traits so that the in-process
//! channel transport used today could be replaced by a serialised one without
//! changing either endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, time-ordered job identifier (UUID v7).
pub type JobId = Uuid;

/// A unit of work sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// The job this request belongs to.
    pub job_id: JobId,
    /// Textual function payload the worker will rehydrate into a callable.
    pub payload: String,
    /// Ordered, transport-safe argument values.
    pub args: Vec<serde_json::Value>,
}

/// A worker's reply to a [`JobRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    /// The job this response answers.
    pub job_id: JobId,
    /// Exactly one of a result value or an error payload.
    pub outcome: Outcome,
}

/// The two mutually exclusive ways a job can finish on a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The computation produced a value.
    Result(serde_json::Value),
    /// The computation failed; the original error is preserved.
    Error(WireError),
}

/// Error payload carried back over the wire when user code fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    /// Human-readable message from the failing computation.
    pub message: String,
    /// Machine-readable error kind (e.g. "TypeError", "UnknownTask").
    pub kind: String,
    /// Call-site trace captured where the error was raised, if available.
    pub trace: Option<String>,
}

impl JobResponse {
    /// Build a success response.
    pub fn ok(job_id: JobId, value: serde_json::Value) -> Self {
        Self {
            job_id,
            outcome: Outcome::Result(value),
        }
    }

    /// Build a failure response.
    pub fn err(job_id: JobId, error: WireError) -> Self {
        Self {
            job_id,
            outcome: Outcome::Error(error),
        }
    }
}

impl WireError {
    /// Create a new wire error with the given kind and message.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            trace: None,
        }
    }

    /// Attach a captured trace to this error.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
