//! Pool metrics.
//!
//! Monotonic counters plus live gauges, all lock-free atomics so the
//! scheduler can record transitions without contention and any reader can
//! take a snapshot at will. Counter increments are observed monotonic from
//! any single reader; a concurrent update may be reflected in the next
//! snapshot rather than the current one.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Records every scheduler transition worth observing.
#[derive(Debug)]
pub struct MetricsRecorder {
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    worker_restarts: AtomicU64,
    total_execution_ms: AtomicU64,
    active_jobs: AtomicUsize,
    queue_depth: AtomicUsize,
    worker_count: AtomicUsize,
    started_at: Mutex<Instant>,
}

/// Point-in-time view of the pool's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs that resolved with a value.
    pub completed_jobs: u64,
    /// Jobs that rejected with any failure kind.
    pub failed_jobs: u64,
    /// Workers replaced after a crash, timeout kill or eviction.
    pub worker_restarts: u64,
    /// Sum of execution time across completed jobs, in milliseconds.
    pub total_execution_ms: u64,
    /// `total_execution_ms / completed_jobs`, zero when nothing completed.
    pub avg_execution_ms: u64,
    /// Jobs currently bound to a worker.
    pub active_jobs: usize,
    /// Jobs waiting in the priority queue.
    pub queue_depth: usize,
    /// Current worker count.
    pub worker_count: usize,
    /// Time since construction or the last reset.
    #[serde(skip)]
    pub uptime: Duration,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            completed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
            worker_restarts: AtomicU64::new(0),
            total_execution_ms: AtomicU64::new(0),
            active_jobs: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
            worker_count: AtomicUsize::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Record a successful completion and its execution time.
    pub fn record_completion(&self, execution_time: Duration) {
        self.completed_jobs.fetch_add(1, Ordering::Relaxed);
        self.total_execution_ms
            .fetch_add(execution_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a failed job (timeout, cancellation, crash, user error).
    pub fn record_failure(&self) {
        self.failed_jobs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a worker replacement.
    pub fn record_restart(&self) {
        self.worker_restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the in-flight gauge.
    pub fn set_active(&self, active: usize) {
        self.active_jobs.store(active, Ordering::Relaxed);
    }

    /// Update the queue-depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Update the worker-count gauge.
    pub fn set_worker_count(&self, count: usize) {
        self.worker_count.store(count, Ordering::Relaxed);
    }

    /// Current worker count.
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Relaxed)
    }

    /// Current queue depth.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Take a consistent snapshot of all counters and gauges.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed_jobs = self.completed_jobs.load(Ordering::Relaxed);
        let total_execution_ms = self.total_execution_ms.load(Ordering::Relaxed);
        let avg_execution_ms = if completed_jobs == 0 {
            0
        } else {
            total_execution_ms / completed_jobs
        };

        MetricsSnapshot {
            completed_jobs,
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            worker_restarts: self.worker_restarts.load(Ordering::Relaxed),
            total_execution_ms,
            avg_execution_ms,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            worker_count: self.worker_count.load(Ordering::Relaxed),
            uptime: self.started_at.lock().map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    /// Zero the monotonic counters and rebase the uptime clock.
    ///
    /// Gauges are live and left untouched.
    pub fn reset(&self) {
        self.completed_jobs.store(0, Ordering::Relaxed);
        self.failed_jobs.store(0, Ordering::Relaxed);
        self.worker_restarts.store(0, Ordering::Relaxed);
        self.total_execution_ms.store(0, Ordering::Relaxed);
        if let Ok(mut started_at) = self.started_at.lock() {
            *started_at = Instant::now();
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
