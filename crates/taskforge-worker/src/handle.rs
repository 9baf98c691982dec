//! Worker handles.
//!
//! A [`WorkerHandle`] is the scheduler-visible side of one isolated execution
//! context: a dedicated OS thread running the protocol loop around a shared
//! [`WorkerRuntime`]. The thread blocks on a [`crossbeam::channel`] request
//! channel and reports everything it observes -- completions, crashes, orderly
//! exits -- as [`WorkerEvent`]s on the scheduler's event channel.
//!
//! # Liveness
//!
//! The handle carries the liveness metadata the pool's health checker reads:
//! a failure counter, a monotonic last-heartbeat instant (touched on every
//! send and every message from the worker), and a healthy flag.
//!
//! # Termination
//!
//! [`WorkerHandle::terminate`] is an orderly stop: it hangs up the request
//! channel, so the thread exits as soon as its current invocation (if any)
//! returns. An OS thread spinning inside user code cannot be forcibly killed;
//! such a context is abandoned and its late events are ignored by the
//! scheduler because its id is no longer registered.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, WorkerError};
use crate::protocol::{JobRequest, JobResponse};
use crate::runtime::{self, WorkerRuntime};

/// Unique, time-ordered worker identifier (UUID v7).
pub type WorkerId = Uuid;

/// What a worker reports back to the scheduler.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The worker finished a request (successfully or with a job-level
    /// error payload).
    Completed {
        worker_id: WorkerId,
        response: JobResponse,
    },
    /// User code panicked; the execution context is torn down.
    Crashed { worker_id: WorkerId, cause: String },
    /// The worker thread exited. Code 0 is an orderly hang-up.
    Exited { worker_id: WorkerId, code: i32 },
}

/// Snapshot of one worker's state, for observability listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// The worker's id.
    pub id: WorkerId,
    /// Whether the worker is considered usable.
    pub healthy: bool,
    /// Whether a job is currently bound to this worker.
    pub busy: bool,
    /// Consecutive crash count since the last successful completion.
    pub failure_count: u32,
    /// When the execution context was spawned.
    pub spawned_at: DateTime<Utc>,
}

/// Scheduler-side handle to one isolated execution context.
pub struct WorkerHandle {
    id: WorkerId,
    request_tx: Option<Sender<JobRequest>>,
    failure_count: u32,
    last_heartbeat: Instant,
    healthy: bool,
    busy: bool,
    idle_since: Instant,
    spawned_at: DateTime<Utc>,
}

impl WorkerHandle {
    /// Spawn a new execution context.
    ///
    /// The thread takes a shared reference to `runtime` and reports its
    /// events on `events`.
    pub fn spawn(
        runtime: Arc<dyn WorkerRuntime>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let id = Uuid::now_v7();
        let (request_tx, request_rx) = crossbeam::channel::unbounded::<JobRequest>();

        std::thread::Builder::new()
            .name(format!("taskforge-worker-{id}"))
            .spawn(move || worker_loop(id, runtime, request_rx, events))
            .map_err(|e| WorkerError::Spawn {
                reason: e.to_string(),
            })?;

        tracing::info!(worker_id = %id, "worker spawned");

        let now = Instant::now();
        Ok(Self {
            id,
            request_tx: Some(request_tx),
            failure_count: 0,
            last_heartbeat: now,
            healthy: true,
            busy: false,
            idle_since: now,
            spawned_at: Utc::now(),
        })
    }

    /// The worker's id.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand a request to the execution context.
    ///
    /// Touches the heartbeat on success.
    pub fn send(&mut self, request: JobRequest) -> Result<()> {
        let tx = self
            .request_tx
            .as_ref()
            .ok_or(WorkerError::Terminated { worker_id: self.id })?;

        tx.send(request)
            .map_err(|_| WorkerError::Disconnected { worker_id: self.id })?;

        self.last_heartbeat = Instant::now();
        Ok(())
    }

    /// Record activity observed from the worker.
    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    /// Record a crash: bumps the failure counter and marks the worker
    /// unhealthy. Returns the new counter value.
    pub fn record_failure(&mut self) -> u32 {
        self.failure_count += 1;
        self.healthy = false;
        self.failure_count
    }

    /// Zero the failure counter after a successful completion.
    pub fn reset_failures(&mut self) {
        self.failure_count = 0;
    }

    /// Mark the worker unusable (timeout kill, health-check eviction).
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Whether the worker is considered usable.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Consecutive crash count since the last successful completion.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Monotonic instant of the last observed activity.
    pub fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }

    /// Mark the worker busy or idle. Going idle rebases [`Self::idle_since`].
    pub fn set_busy(&mut self, busy: bool) {
        if self.busy && !busy {
            self.idle_since = Instant::now();
        }
        self.busy = busy;
    }

    /// Whether a job is currently bound to this worker.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Monotonic instant since which the worker has been idle.
    pub fn idle_since(&self) -> Instant {
        self.idle_since
    }

    /// Snapshot this worker's state.
    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            healthy: self.healthy,
            busy: self.busy,
            failure_count: self.failure_count,
            spawned_at: self.spawned_at,
        }
    }

    /// Stop the execution context.
    ///
    /// Orderly: hangs up the request channel so the thread exits after its
    /// current invocation. Idempotent -- later calls are no-ops.
    pub fn terminate(&mut self) {
        if self.request_tx.take().is_some() {
            self.healthy = false;
            tracing::info!(worker_id = %self.id, "worker terminated");
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("healthy", &self.healthy)
            .field("busy", &self.busy)
            .field("failure_count", &self.failure_count)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Thread side
// ---------------------------------------------------------------------------

/// Protocol loop run by the worker thread.
///
/// Receives requests until the channel hangs up, executing each under
/// `catch_unwind` so a panicking task surfaces as a crash event instead of
/// tearing down the process.
fn worker_loop(
    id: WorkerId,
    runtime: Arc<dyn WorkerRuntime>,
    requests: Receiver<JobRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Ok(request) = requests.recv() {
        let job_id = request.job_id;
        tracing::debug!(worker_id = %id, job_id = %job_id, "request received");

        let outcome = catch_unwind(AssertUnwindSafe(|| runtime::execute(runtime.as_ref(), &request)));

        match outcome {
            Ok(response) => {
                if events
                    .send(WorkerEvent::Completed {
                        worker_id: id,
                        response,
                    })
                    .is_err()
                {
                    // Scheduler is gone; nothing left to report to.
                    return;
                }
            }
            Err(panic) => {
                let cause = panic_message(&*panic);
                tracing::error!(worker_id = %id, job_id = %job_id, cause = %cause, "task panicked");
                let _ = events.send(WorkerEvent::Crashed {
                    worker_id: id,
                    cause,
                });
                return;
            }
        }
    }

    let _ = events.send(WorkerEvent::Exited {
        worker_id: id,
        code: 0,
    });
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
