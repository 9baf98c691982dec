//! The pool scheduler.
//!
//! [`Pool`] is the submission surface; behind it, a single background task
//! owns every piece of scheduler state -- the workers vector, the priority
//! queue, the worker-to-job bindings, the closing flag and the shutdown
//! waiters -- so no two transitions can observe each other mid-update. The
//! task is fed by an mpsc command channel (submissions, cancellations,
//! shutdown) and by the shared worker event channel; timeout timers and
//! cancel listeners are small spawned tasks that message the loop and are
//! aborted the moment their job completes.
//!
//! # Job lifecycle
//!
//! ```text
//! submit --> validate --> queued --> bound --> completed
//!                            \          \-->  timed out / cancelled / crashed
//!                             \-->  cancelled while queued
//! ```
//!
//! Every submission resolves its ticket exactly once, whichever of the
//! worker response, the timeout timer, the cancel handle or pool teardown
//! wins the race.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use taskforge_worker::{
    JobRequest, JobResponse, Outcome, WorkerEvent, WorkerHandle, WorkerId, WorkerInfo,
    WorkerRuntime,
};

use crate::cancel::CancelHandle;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::job::{Job, JobId, JobTicket, SubmitOptions};
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::queue::PriorityQueue;
use crate::validate::Validator;

/// Messages into the scheduler loop.
enum Command {
    Submit(Job),
    Cancel(JobId),
    TimedOut(JobId),
    Close(oneshot::Sender<()>),
    Workers(oneshot::Sender<Vec<WorkerInfo>>),
    Terminate,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Priority-aware pool of isolated execution contexts.
///
/// Construct with [`Pool::new`] from within a tokio runtime. The pool is
/// `Send + Sync`; share it behind [`Arc`] if several tasks submit work.
/// Dropping the pool terminates it.
pub struct Pool {
    cmd_tx: mpsc::UnboundedSender<Command>,
    metrics: Arc<MetricsRecorder>,
    closing: Arc<AtomicBool>,
    validator: Option<Validator>,
}

impl Pool {
    /// Spawn the initial workers and start the scheduler loop.
    ///
    /// Fails if the configuration is inconsistent or a worker thread cannot
    /// be spawned.
    pub fn new(config: PoolConfig, runtime: Arc<dyn WorkerRuntime>) -> Result<Self> {
        if config.max_pool_size == 0 {
            return Err(PoolError::Internal(
                "max_pool_size must be at least 1".to_string(),
            ));
        }
        if config.min_pool_size > config.max_pool_size {
            return Err(PoolError::Internal(format!(
                "min_pool_size {} exceeds max_pool_size {}",
                config.min_pool_size, config.max_pool_size
            )));
        }
        if config.health_check_interval.is_zero() {
            return Err(PoolError::Internal(
                "health_check_interval must be positive".to_string(),
            ));
        }

        let validator = if config.strict_mode {
            Some(Validator::new()?)
        } else {
            None
        };

        let metrics = Arc::new(MetricsRecorder::new());
        let closing = Arc::new(AtomicBool::new(false));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, event_rx) = mpsc::unbounded_channel();

        let initial = config
            .pool_size
            .clamp(config.min_pool_size.max(1), config.max_pool_size);
        let mut workers = Vec::with_capacity(initial);
        for _ in 0..initial {
            let worker = WorkerHandle::spawn(Arc::clone(&runtime), events_tx.clone())
                .map_err(|e| PoolError::Internal(e.to_string()))?;
            workers.push(worker);
        }
        metrics.set_worker_count(workers.len());

        tracing::info!(
            workers = workers.len(),
            strict_mode = config.strict_mode,
            auto_scale = config.auto_scale,
            "pool started"
        );

        let scheduler = Scheduler {
            config,
            runtime,
            workers,
            queue: PriorityQueue::new(),
            inflight: HashMap::new(),
            closing: false,
            stopped: false,
            shutdown_waiters: Vec::new(),
            metrics: Arc::clone(&metrics),
            events_tx,
            cmd_tx: cmd_tx.clone(),
            closing_flag: Arc::clone(&closing),
        };
        tokio::spawn(scheduler.run(cmd_rx, event_rx));

        Ok(Self {
            cmd_tx,
            metrics,
            closing,
            validator,
        })
    }

    /// Submit a computation.
    ///
    /// Returns immediately with a [`JobTicket`]; every rejection -- closing
    /// pool, failed validation, pre-triggered cancel handle -- travels
    /// through the ticket rather than a synchronous error.
    pub fn submit(
        &self,
        options: SubmitOptions,
        payload: impl Into<String>,
        args: Vec<serde_json::Value>,
    ) -> JobTicket {
        let payload = payload.into();
        let id = Uuid::now_v7();

        if self.closing.load(Ordering::Acquire) {
            return self.reject(id, PoolError::Closing);
        }

        if options.timeout.is_some_and(|t| t.is_zero()) {
            return self.reject(
                id,
                PoolError::Validation {
                    reason: "timeout must be positive".to_string(),
                },
            );
        }

        if let Some(validator) = &self.validator {
            if let Err(error) = validator
                .check_payload(&payload)
                .and_then(|()| validator.check_args(&args))
            {
                return self.reject(id, error);
            }
        }

        if options.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
            return self.reject(id, PoolError::Cancelled);
        }

        let (sink, rx) = oneshot::channel();
        let job = Job::new(id, payload, args, options, sink);
        if self.cmd_tx.send(Command::Submit(job)).is_err() {
            // Scheduler already exited; the dropped sink fails the ticket.
            tracing::debug!(job_id = %id, "submission raced pool teardown");
        }
        JobTicket::new(id, rx)
    }

    /// Fail a submission through its ticket, counting it as an observed
    /// failure so completions plus failures cover every terminated
    /// submission.
    fn reject(&self, id: JobId, error: PoolError) -> JobTicket {
        tracing::debug!(job_id = %id, error = %error, "submission rejected");
        self.metrics.record_failure();
        JobTicket::rejected(id, error)
    }

    /// Take a metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero the metric counters and rebase uptime.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Current worker count.
    pub fn size(&self) -> usize {
        self.metrics.worker_count()
    }

    /// Current number of queued jobs.
    pub fn queue_depth(&self) -> usize {
        self.metrics.queue_depth()
    }

    /// Snapshot every worker's state.
    pub async fn workers(&self) -> Vec<WorkerInfo> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Workers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Graceful shutdown: stop accepting work, wait for the queue and all
    /// in-flight jobs to drain, then stop every worker.
    ///
    /// The wait is event-driven; the scheduler's completion path signals it.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_err() {
            return; // already terminated
        }
        let _ = rx.await;
    }

    /// Immediate shutdown: fail in-flight jobs, drop the queue, stop every
    /// worker. Idempotent, and safe during or after [`Pool::close`].
    pub fn terminate(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.cmd_tx.send(Command::Terminate);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ---------------------------------------------------------------------------
// Scheduler loop
// ---------------------------------------------------------------------------

/// All mutable scheduler state. Owned by exactly one task.
struct Scheduler {
    config: PoolConfig,
    runtime: Arc<dyn WorkerRuntime>,
    workers: Vec<WorkerHandle>,
    queue: PriorityQueue,
    /// Jobs currently bound to a worker, keyed by worker id.
    inflight: HashMap<WorkerId, Job>,
    closing: bool,
    stopped: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
    metrics: Arc<MetricsRecorder>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    closing_flag: Arc<AtomicBool>,
}

impl Scheduler {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let mut health = tokio::time::interval(self.config.health_check_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(Command::Submit(job)) => self.on_submit(job),
                    Some(Command::Cancel(job_id)) => self.on_cancel(job_id),
                    Some(Command::TimedOut(job_id)) => self.on_timeout(job_id),
                    Some(Command::Close(waiter)) => self.on_close(waiter),
                    Some(Command::Workers(reply)) => {
                        let _ = reply.send(self.worker_infos());
                    }
                    // A dropped command channel means the pool itself is gone.
                    Some(Command::Terminate) | None => self.on_terminate(),
                },
                event = event_rx.recv() => {
                    if let Some(event) = event {
                        self.on_worker_event(event);
                    }
                }
                _ = health.tick() => {
                    if !self.closing {
                        self.on_health_tick();
                    }
                }
            }

            if !self.stopped {
                self.pump();
                self.check_drained();
            }
            if self.stopped {
                break;
            }
        }

        tracing::debug!("scheduler loop exited");
    }

    // -- Submission & dispatch ----------------------------------------------

    fn on_submit(&mut self, mut job: Job) {
        if self.closing {
            self.metrics.record_failure();
            job.finish(Err(PoolError::Closing));
            return;
        }

        // The submission fast-path already rejected pre-triggered handles;
        // register a listener so a later trigger reaches the loop.
        if let Some(handle) = job.cancel.clone() {
            let cmd_tx = self.cmd_tx.clone();
            let job_id = job.id;
            let listener = tokio::spawn(async move {
                handle.cancelled().await;
                let _ = cmd_tx.send(Command::Cancel(job_id));
            });
            job.cancel_listener = Some(listener.abort_handle());
        }

        tracing::debug!(job_id = %job.id, priority = ?job.priority, "job accepted");
        self.queue.enqueue(job);
        self.metrics.set_queue_depth(self.queue.len());
        self.maybe_scale_up();
    }

    /// Move queued jobs onto idle healthy workers until one side runs dry.
    fn pump(&mut self) {
        while let Some(idx) = self.idle_worker() {
            let Some(job) = self.queue.dequeue() else { break };
            self.metrics.set_queue_depth(self.queue.len());
            if !self.start_job(idx, job) {
                // Dispatch failed and the job went back to the queue front;
                // retry on the next loop turn rather than spinning here.
                break;
            }
        }
    }

    /// Bind `job` to the worker at `idx` and send the request envelope.
    ///
    /// Returns `false` if the worker's channel was already dead, in which
    /// case the job is back at the front of its band and the worker has been
    /// replaced.
    fn start_job(&mut self, idx: usize, mut job: Job) -> bool {
        job.started_at = Some(Instant::now());

        if let Some(timeout) = job.timeout {
            let cmd_tx = self.cmd_tx.clone();
            let job_id = job.id;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = cmd_tx.send(Command::TimedOut(job_id));
            });
            job.timeout_task = Some(timer.abort_handle());
        }

        let request = JobRequest {
            job_id: job.id,
            payload: job.payload.clone(),
            args: job.args.clone(),
        };
        let worker_id = self.workers[idx].id();

        if let Err(error) = self.workers[idx].send(request) {
            tracing::warn!(worker_id = %worker_id, error = %error, "dispatch failed; replacing worker");
            job.disarm_timeout();
            self.queue.requeue_front(job);
            self.metrics.set_queue_depth(self.queue.len());
            self.restart_worker_at(idx);
            return false;
        }

        self.workers[idx].set_busy(true);
        tracing::debug!(job_id = %job.id, worker_id = %worker_id, "job started");
        self.inflight.insert(worker_id, job);
        self.metrics.set_active(self.inflight.len());
        true
    }

    fn idle_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .position(|w| w.is_healthy() && !w.is_busy())
    }

    fn worker_index(&self, worker_id: WorkerId) -> Option<usize> {
        self.workers.iter().position(|w| w.id() == worker_id)
    }

    fn worker_infos(&self) -> Vec<WorkerInfo> {
        self.workers.iter().map(WorkerHandle::info).collect()
    }

    // -- Worker events ------------------------------------------------------

    fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed {
                worker_id,
                response,
            } => self.on_completed(worker_id, response),
            WorkerEvent::Crashed { worker_id, cause } => self.on_crashed(worker_id, cause),
            WorkerEvent::Exited { worker_id, code } => {
                if code == 0 || self.closing {
                    return;
                }
                self.on_crashed(worker_id, format!("worker exited with code {code}"));
            }
        }
    }

    fn on_completed(&mut self, worker_id: WorkerId, response: JobResponse) {
        let Some(idx) = self.worker_index(worker_id) else {
            // A replaced worker finishing its abandoned job; the binding is
            // long gone and the ticket was already resolved.
            tracing::trace!(worker_id = %worker_id, "response from unregistered worker ignored");
            return;
        };

        self.workers[idx].record_heartbeat();
        self.workers[idx].set_busy(false);

        let Some(mut job) = self.inflight.remove(&worker_id) else {
            tracing::trace!(worker_id = %worker_id, "response without a bound job ignored");
            return;
        };
        self.workers[idx].reset_failures();

        let execution_time = job.started_at.map(|t| t.elapsed()).unwrap_or_default();
        match response.outcome {
            Outcome::Result(value) => {
                self.metrics.record_completion(execution_time);
                tracing::debug!(
                    job_id = %job.id,
                    worker_id = %worker_id,
                    elapsed_ms = execution_time.as_millis() as u64,
                    "job completed"
                );
                job.finish(Ok(value));
            }
            Outcome::Error(error) => {
                self.metrics.record_failure();
                tracing::debug!(job_id = %job.id, worker_id = %worker_id, error = %error, "job failed in user code");
                job.finish(Err(PoolError::from(error)));
            }
        }
        self.metrics.set_active(self.inflight.len());
    }

    fn on_crashed(&mut self, worker_id: WorkerId, cause: String) {
        let Some(idx) = self.worker_index(worker_id) else {
            tracing::trace!(worker_id = %worker_id, "crash from unregistered worker ignored");
            return;
        };

        let failures = self.workers[idx].record_failure();
        tracing::error!(worker_id = %worker_id, failures, cause = %cause, "worker crashed");

        if let Some(mut job) = self.inflight.remove(&worker_id) {
            self.metrics.record_failure();
            job.finish(Err(PoolError::WorkerCrash { cause }));
            self.metrics.set_active(self.inflight.len());
        }

        self.restart_worker_at(idx);
    }

    /// Terminate the worker at `idx` and put a fresh one in its slot,
    /// preserving the pool size.
    fn restart_worker_at(&mut self, idx: usize) {
        let old_id = self.workers[idx].id();
        self.workers[idx].terminate();

        match WorkerHandle::spawn(Arc::clone(&self.runtime), self.events_tx.clone()) {
            Ok(fresh) => {
                tracing::info!(old_worker = %old_id, new_worker = %fresh.id(), "worker restarted in place");
                self.workers[idx] = fresh;
            }
            Err(error) => {
                // The slot keeps its terminated handle; the pool size
                // invariant holds and the slot is skipped as unhealthy.
                tracing::error!(worker_id = %old_id, error = %error, "failed to respawn worker");
            }
        }

        self.metrics.record_restart();
        self.metrics.set_worker_count(self.workers.len());
    }

    // -- Timeout & cancellation ---------------------------------------------

    fn on_timeout(&mut self, job_id: JobId) {
        // The timer may have lost the race against completion.
        let Some((&worker_id, _)) = self.inflight.iter().find(|(_, job)| job.id == job_id) else {
            return;
        };
        let Some(mut job) = self.inflight.remove(&worker_id) else {
            return;
        };

        let timeout = job.timeout.unwrap_or_default();
        tracing::warn!(job_id = %job_id, worker_id = %worker_id, ?timeout, "job timed out; replacing its worker");
        job.finish(Err(PoolError::Timeout { timeout }));
        self.metrics.record_failure();
        self.metrics.set_active(self.inflight.len());

        // The worker may be stuck in user code; treat it as unrecoverable.
        if let Some(idx) = self.worker_index(worker_id) {
            self.workers[idx].mark_unhealthy();
            self.restart_worker_at(idx);
        }
    }

    fn on_cancel(&mut self, job_id: JobId) {
        // Bound: same replacement path as a timeout, different failure kind.
        if let Some((&worker_id, _)) = self.inflight.iter().find(|(_, job)| job.id == job_id) {
            let Some(mut job) = self.inflight.remove(&worker_id) else {
                return;
            };
            tracing::debug!(job_id = %job_id, worker_id = %worker_id, "bound job cancelled");
            job.finish(Err(PoolError::Cancelled));
            self.metrics.record_failure();
            self.metrics.set_active(self.inflight.len());

            if let Some(idx) = self.worker_index(worker_id) {
                self.workers[idx].mark_unhealthy();
                self.restart_worker_at(idx);
            }
            return;
        }

        // Queued: remove eagerly so the dispatcher never sees it.
        if let Some(mut job) = self.queue.remove(job_id) {
            tracing::debug!(job_id = %job_id, "queued job cancelled");
            job.finish(Err(PoolError::Cancelled));
            self.metrics.record_failure();
            self.metrics.set_queue_depth(self.queue.len());
        }
        // Otherwise the job already completed; nothing to do.
    }

    // -- Health & scaling ---------------------------------------------------

    fn on_health_tick(&mut self) {
        let stalled: Vec<WorkerId> = self
            .inflight
            .keys()
            .copied()
            .filter(|worker_id| {
                self.worker_index(*worker_id).is_some_and(|idx| {
                    self.workers[idx].last_heartbeat().elapsed() > self.config.max_inactivity
                })
            })
            .collect();

        for worker_id in stalled {
            let Some(mut job) = self.inflight.remove(&worker_id) else {
                continue;
            };
            tracing::warn!(
                worker_id = %worker_id,
                job_id = %job.id,
                "worker unresponsive; evicting it and re-queueing its job"
            );

            // Head re-queue: the interrupted job keeps its position in its
            // band. The timer re-arms when the job is dispatched again.
            job.disarm_timeout();
            self.queue.requeue_front(job);
            self.metrics.set_queue_depth(self.queue.len());
            self.metrics.set_active(self.inflight.len());

            if let Some(idx) = self.worker_index(worker_id) {
                self.workers[idx].mark_unhealthy();
                self.restart_worker_at(idx);
            }
        }

        self.maybe_scale_down();
    }

    fn maybe_scale_up(&mut self) {
        if !self.config.auto_scale
            || self.idle_worker().is_some()
            || self.queue.len() < self.config.scale_up_threshold
            || self.workers.len() >= self.config.max_pool_size
        {
            return;
        }

        match WorkerHandle::spawn(Arc::clone(&self.runtime), self.events_tx.clone()) {
            Ok(worker) => {
                tracing::info!(
                    worker_id = %worker.id(),
                    queue_depth = self.queue.len(),
                    workers = self.workers.len() + 1,
                    "scaled up"
                );
                self.workers.push(worker);
                self.metrics.set_worker_count(self.workers.len());
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to spawn scale-up worker");
            }
        }
    }

    fn maybe_scale_down(&mut self) {
        if !self.config.auto_scale || self.workers.len() <= self.config.min_pool_size {
            return;
        }

        // One retirement per tick keeps the contraction gentle.
        let retire = self.workers.iter().position(|w| {
            w.is_healthy() && !w.is_busy() && w.idle_since().elapsed() >= self.config.scale_down_delay
        });
        if let Some(idx) = retire {
            let mut worker = self.workers.remove(idx);
            tracing::info!(worker_id = %worker.id(), workers = self.workers.len(), "idle worker retired");
            worker.terminate();
            self.metrics.set_worker_count(self.workers.len());
        }
    }

    // -- Shutdown -----------------------------------------------------------

    fn on_close(&mut self, waiter: oneshot::Sender<()>) {
        if !self.closing {
            tracing::info!(
                queued = self.queue.len(),
                inflight = self.inflight.len(),
                "pool closing"
            );
        }
        self.closing = true;
        self.closing_flag.store(true, Ordering::Release);
        self.shutdown_waiters.push(waiter);
        // check_drained() after this handler signals immediately if the pool
        // is already drained.
    }

    /// Signal the shutdown waiters once a closing pool has fully drained.
    fn check_drained(&mut self) {
        if !self.closing || self.stopped {
            return;
        }
        if self.queue.is_empty() && self.inflight.is_empty() {
            tracing::info!("pool drained");
            for waiter in self.shutdown_waiters.drain(..) {
                let _ = waiter.send(());
            }
            self.shutdown_workers();
            self.stopped = true;
        }
    }

    fn on_terminate(&mut self) {
        if self.stopped {
            return;
        }
        tracing::info!(
            queued = self.queue.len(),
            inflight = self.inflight.len(),
            "pool terminating"
        );
        self.closing = true;
        self.closing_flag.store(true, Ordering::Release);

        for (_, mut job) in self.inflight.drain() {
            self.metrics.record_failure();
            job.finish(Err(PoolError::WorkerCrash {
                cause: "pool terminated".to_string(),
            }));
        }
        // Dropping the queued jobs drops their sinks; the tickets observe
        // the teardown through the hang-up.
        self.queue.clear();
        self.metrics.set_queue_depth(0);
        self.metrics.set_active(0);

        self.shutdown_workers();
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        self.stopped = true;
    }

    fn shutdown_workers(&mut self) {
        for worker in &mut self.workers {
            worker.terminate();
        }
        self.metrics.set_worker_count(0);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
