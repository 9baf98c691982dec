//! Jobs, submission options and completion tickets.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::cancel::CancelHandle;
use crate::error::PoolError;

pub use taskforge_worker::JobId;

/// Priority band of a job.
///
/// Discriminants preserve numeric ordering: lower value, higher urgency.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Priority {
    /// Dispatched before anything else in the queue.
    High = 0,
    /// Default priority for most work.
    #[default]
    Normal = 1,
    /// Background / best-effort.
    Low = 2,
}

impl Priority {
    /// All bands, highest urgency first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Queue band index.
    pub(crate) fn band(self) -> usize {
        self as usize
    }
}

/// Per-job controls supplied at submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Maximum execution time before the job fails with a timeout.
    pub timeout: Option<Duration>,
    /// External cancellation handle the pool will observe.
    pub cancel: Option<CancelHandle>,
    /// Priority band. Defaults to [`Priority::Normal`].
    pub priority: Priority,
}

impl SubmitOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an external cancellation handle.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Set the priority band.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A scheduled unit of work, owned by the scheduler from submission until
/// its sink has been signalled exactly once.
pub(crate) struct Job {
    pub id: JobId,
    pub payload: String,
    pub args: Vec<serde_json::Value>,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelHandle>,
    /// One-shot completion sink; consumed by [`Job::finish`].
    sink: Option<oneshot::Sender<Result<serde_json::Value, PoolError>>>,
    /// Stamped when the job is handed to a worker.
    pub started_at: Option<Instant>,
    /// Armed timeout timer, if any.
    pub timeout_task: Option<AbortHandle>,
    /// Registered cancel listener, if any.
    pub cancel_listener: Option<AbortHandle>,
}

impl Job {
    pub fn new(
        id: JobId,
        payload: String,
        args: Vec<serde_json::Value>,
        options: SubmitOptions,
        sink: oneshot::Sender<Result<serde_json::Value, PoolError>>,
    ) -> Self {
        Self {
            id,
            payload,
            args,
            priority: options.priority,
            timeout: options.timeout,
            cancel: options.cancel,
            sink: Some(sink),
            started_at: None,
            timeout_task: None,
            cancel_listener: None,
        }
    }

    /// Signal the completion sink and release every runtime attachment.
    ///
    /// The sink is consumed on the first call; timers and listeners are
    /// disarmed on every call, so completion paths cannot leak either.
    pub fn finish(&mut self, outcome: Result<serde_json::Value, PoolError>) {
        self.disarm_timeout();
        if let Some(listener) = self.cancel_listener.take() {
            listener.abort();
        }
        if let Some(sink) = self.sink.take() {
            // The caller may have dropped its ticket; that is not an error.
            let _ = sink.send(outcome);
        }
    }

    /// Abort the armed timeout timer, if any. Used when a stalled job is
    /// pulled off a worker and re-queued: the timer re-arms on re-dispatch.
    pub fn disarm_timeout(&mut self) {
        if let Some(timer) = self.timeout_task.take() {
            timer.abort();
        }
        self.started_at = None;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// The caller's read-only handle to a submitted job.
///
/// Awaiting the ticket yields the job's result or its typed failure. Every
/// ticket completes exactly once.
#[derive(Debug)]
pub struct JobTicket {
    id: JobId,
    rx: oneshot::Receiver<Result<serde_json::Value, PoolError>>,
}

impl JobTicket {
    pub(crate) fn new(
        id: JobId,
        rx: oneshot::Receiver<Result<serde_json::Value, PoolError>>,
    ) -> Self {
        Self { id, rx }
    }

    /// Build a ticket that is already failed (submission-time rejection).
    pub(crate) fn rejected(id: JobId, error: PoolError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id, rx }
    }

    /// The id of the submitted job.
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl Future for JobTicket {
    type Output = Result<serde_json::Value, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The scheduler dropped the sink without signalling: the pool was
            // torn down around this job.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::WorkerCrash {
                cause: "pool terminated before the job completed".to_string(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
