//! Taskforge pool scheduler.
//!
//! A priority-aware pool of isolated execution contexts for CPU-bound,
//! side-effect-light computations:
//!
//! - **[`pool`]** -- The [`Pool`] itself: submission API, dispatch, per-job
//!   timeout and external cancellation, crash recovery with restart in
//!   place, periodic health checks, optional autoscaling, and graceful vs.
//!   immediate shutdown.
//! - **`queue`** -- Three-band FIFO priority queue (internal).
//! - **[`validate`]** -- Strict-mode submission checks built on
//!   [`aho_corasick`] and [`regex`].
//! - **[`cancel`]** -- [`CancelHandle`], the caller-side cancellation
//!   trigger.
//! - **[`metrics`]** -- Lock-free counters and gauges with on-demand
//!   snapshots.
//! - **[`job`]** -- Submission options, priorities and the awaitable
//!   [`JobTicket`].
//! - **[`error`]** -- Typed failure kinds via [`thiserror`]; every failure
//!   reaches the submitting caller's ticket and nothing else.
//!
//! Execution contexts and the wire protocol live in the `taskforge-worker`
//! crate; its commonly used types are re-exported here.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use taskforge_pool::{Pool, PoolConfig, SubmitOptions, TaskTable};
//! # async fn example() -> Result<(), taskforge_pool::PoolError> {
//! let table = TaskTable::new();
//! table.register("(a, b) => a + b", |args| {
//!     let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
//!     Ok(serde_json::json!(sum))
//! });
//!
//! let pool = Pool::new(PoolConfig::default(), Arc::new(table))?;
//! let value = pool
//!     .submit(
//!         SubmitOptions::default(),
//!         "(a, b) => a + b",
//!         vec![serde_json::json!(2), serde_json::json!(3)],
//!     )
//!     .await?;
//! assert_eq!(value, serde_json::json!(5));
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod validate;

mod queue;

// Re-export the most commonly used types at the crate root for convenience.
pub use cancel::CancelHandle;
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use job::{JobId, JobTicket, Priority, SubmitOptions};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use pool::Pool;

// Worker-side types callers routinely need.
pub use taskforge_worker::{
    JobRequest, JobResponse, Outcome, TaskTable, WireError, WorkerInfo, WorkerRuntime,
};
