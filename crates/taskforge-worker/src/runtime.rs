//! Task rehydration.
//!
//! The pool ships function payloads as text; something on the worker side
//! must turn that text back into a callable. [`WorkerRuntime`] is that seam.
//!
//! The implementation provided here, [`TaskTable`], is an ahead-of-time
//! registered table: callers register a payload string together with the
//! native closure it stands for, and workers rehydrate by exact lookup. This
//! keeps the worker from ever constructing code dynamically -- an unknown
//! payload is an error, not an eval.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::{JobRequest, JobResponse, WireError};

/// A rehydrated callable: takes the argument list, returns a value or a
/// wire-shaped error.
pub type TaskFn =
    Arc<dyn Fn(&[serde_json::Value]) -> Result<serde_json::Value, WireError> + Send + Sync>;

/// Turns a function payload back into something a worker can invoke.
///
/// Implementations must be cheap to call from many worker threads at once;
/// the pool hands one shared runtime to every execution context it spawns.
pub trait WorkerRuntime: Send + Sync + 'static {
    /// Resolve `payload` to a callable, or explain why it cannot run.
    fn rehydrate(&self, payload: &str) -> Result<TaskFn, WireError>;
}

/// Execute a request against a runtime, producing the response envelope.
///
/// Panics inside the task are deliberately *not* caught here; the worker
/// thread catches them so they surface as a crash of the execution context
/// rather than a job-level error.
pub fn execute(runtime: &dyn WorkerRuntime, request: &JobRequest) -> JobResponse {
    match runtime.rehydrate(&request.payload) {
        Ok(task) => match task(&request.args) {
            Ok(value) => JobResponse::ok(request.job_id, value),
            Err(error) => JobResponse::err(request.job_id, error),
        },
        Err(error) => JobResponse::err(request.job_id, error),
    }
}

// ---------------------------------------------------------------------------
// TaskTable
// ---------------------------------------------------------------------------

/// Ahead-of-time registered task table keyed by the exact payload text.
///
/// The table is cheaply shareable behind [`Arc`] and safe to mutate while
/// workers are running; registration takes effect for the next lookup.
#[derive(Default)]
pub struct TaskTable {
    tasks: DashMap<String, TaskFn>,
}

impl TaskTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    /// Register a payload and the closure it rehydrates to.
    ///
    /// Re-registering the same payload replaces the previous closure.
    pub fn register<F>(&self, payload: impl Into<String>, task: F)
    where
        F: Fn(&[serde_json::Value]) -> Result<serde_json::Value, WireError>
            + Send
            + Sync
            + 'static,
    {
        let payload = payload.into();
        tracing::debug!(payload = %payload, "task registered");
        self.tasks.insert(payload, Arc::new(task));
    }

    /// Whether the table knows the given payload.
    pub fn contains(&self, payload: &str) -> bool {
        self.tasks.contains_key(payload)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl WorkerRuntime for TaskTable {
    fn rehydrate(&self, payload: &str) -> Result<TaskFn, WireError> {
        self.tasks
            .get(payload)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                WireError::new(
                    "UnknownTask",
                    format!("no task registered for payload: {payload}"),
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
