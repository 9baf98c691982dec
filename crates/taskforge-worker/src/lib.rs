//! Taskforge worker runtime.
//!
//! This crate provides the execution side of the taskforge pool:
//!
//! - **[`protocol`]** -- The request/response envelope exchanged between the
//!   pool scheduler and a worker. Envelopes are serde-serialisable so the
//!   transport can be swapped without touching either side.
//! - **[`runtime`]** -- The [`WorkerRuntime`] rehydration seam plus
//!   [`TaskTable`], an ahead-of-time registered task table backed by
//!   [`DashMap`] that turns a submitted payload back into a callable.
//! - **[`handle`]** -- [`WorkerHandle`], the scheduler-visible handle to one
//!   isolated execution context (a dedicated OS thread running the protocol
//!   loop) together with its liveness metadata.
//! - **[`error`]** -- Worker-side error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod error;
pub mod handle;
pub mod protocol;
pub mod runtime;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{Result, WorkerError};
pub use handle::{WorkerEvent, WorkerHandle, WorkerId, WorkerInfo};
pub use protocol::{JobId, JobRequest, JobResponse, Outcome, WireError};
pub use runtime::{TaskFn, TaskTable, WorkerRuntime};
