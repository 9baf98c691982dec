//! Integration tests for the taskforge-pool crate.
//!
//! These exercise the pool end to end: submission through the validator,
//! priority dispatch, timeouts, external cancellation, crash recovery,
//! health-check eviction, autoscaling and both shutdown modes -- with real
//! worker threads executing registered tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskforge_pool::{
    CancelHandle, Pool, PoolConfig, PoolError, Priority, SubmitOptions, TaskTable,
};

const SUM: &str = "(a, b) => a + b";
const FORTY_TWO: &str = "() => 42";
const BUSY_WAIT: &str = "(ms) => busyWait(ms)";
const RECORD: &str = "(tag) => record(tag)";
const CRASH: &str = "() => { crash }";
const THROW: &str = "() => { throw new TypeError('boom') }";

/// Build a task table with the standard fixtures, recording execution order
/// into `order` where applicable.
fn fixtures(order: Arc<Mutex<Vec<String>>>) -> Arc<TaskTable> {
    let table = TaskTable::new();

    table.register(SUM, |args| {
        let sum: i64 = args.iter().filter_map(serde_json::Value::as_i64).sum();
        Ok(serde_json::json!(sum))
    });

    table.register(FORTY_TWO, |_| Ok(serde_json::json!(42)));

    table.register(BUSY_WAIT, |args| {
        let ms = args.first().and_then(serde_json::Value::as_u64).unwrap_or(0);
        std::thread::sleep(Duration::from_millis(ms));
        Ok(serde_json::json!(ms))
    });

    table.register(RECORD, move |args| {
        let tag = args
            .first()
            .and_then(serde_json::Value::as_str)
            .unwrap_or("?")
            .to_string();
        order.lock().unwrap().push(tag.clone());
        Ok(serde_json::json!(tag))
    });

    table.register(CRASH, |_| panic!("simulated worker crash"));

    table.register(THROW, |_| {
        Err(taskforge_pool::WireError::new("TypeError", "boom").with_trace("at <anonymous>:1:14"))
    });

    Arc::new(table)
}

fn table() -> Arc<TaskTable> {
    fixtures(Arc::new(Mutex::new(Vec::new())))
}

fn config(size: usize) -> PoolConfig {
    PoolConfig::new()
        .with_pool_size(size)
        .with_min_pool_size(1)
        .with_max_pool_size(size.max(1))
}

// ═══════════════════════════════════════════════════════════════════════
//  Basic submission
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn submit_resolves_with_the_computed_value() {
    let pool = Pool::new(PoolConfig::default(), table()).expect("pool");

    let value = pool
        .submit(
            SubmitOptions::default(),
            SUM,
            vec![serde_json::json!(2), serde_json::json!(3)],
        )
        .await
        .expect("sum should resolve");

    assert_eq!(value, serde_json::json!(5));
    pool.close().await;
}

#[tokio::test]
async fn jobs_run_in_parallel_across_workers() {
    let pool = Pool::new(config(4), table()).expect("pool");

    let started = Instant::now();
    let tickets: Vec<_> = (0..4)
        .map(|_| pool.submit(SubmitOptions::default(), BUSY_WAIT, vec![serde_json::json!(300)]))
        .collect();
    for ticket in tickets {
        ticket.await.expect("busy wait should resolve");
    }

    // Serial execution would take 1200 ms; four workers keep it near 300.
    assert!(
        started.elapsed() < Duration::from_millis(900),
        "expected parallel execution, took {:?}",
        started.elapsed()
    );
    pool.close().await;
}

#[tokio::test]
async fn user_errors_are_reconstructed() {
    let pool = Pool::new(config(1), table()).expect("pool");

    let err = pool
        .submit(SubmitOptions::default(), THROW, vec![])
        .await
        .expect_err("thrown error should reject");

    match err {
        PoolError::User {
            kind,
            message,
            trace,
        } => {
            assert_eq!(kind, "TypeError");
            assert_eq!(message, "boom");
            assert_eq!(trace.as_deref(), Some("at <anonymous>:1:14"));
        }
        other => panic!("expected User error, got {other:?}"),
    }
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Timeouts
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn timeout_rejects_and_the_replacement_worker_is_operational() {
    let pool = Pool::new(config(1), table()).expect("pool");

    let err = pool
        .submit(
            SubmitOptions::new().with_timeout(Duration::from_millis(100)),
            BUSY_WAIT,
            vec![serde_json::json!(1000)],
        )
        .await
        .expect_err("long job should time out");
    assert!(matches!(err, PoolError::Timeout { .. }));

    // The stuck worker was replaced; the pool keeps working.
    let value = pool
        .submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect("replacement worker should execute");
    assert_eq!(value, serde_json::json!(42));

    let metrics = pool.metrics();
    assert!(metrics.worker_restarts >= 1);
    assert_eq!(pool.size(), 1);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Priority ordering
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn high_band_preempts_queued_normal_and_low() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pool = Pool::new(config(1), fixtures(Arc::clone(&order))).expect("pool");

    // Occupy the single worker, then queue one job per band out of order.
    let blocker = pool.submit(
        SubmitOptions::default(),
        BUSY_WAIT,
        vec![serde_json::json!(200)],
    );
    let low = pool.submit(
        SubmitOptions::new().with_priority(Priority::Low),
        RECORD,
        vec![serde_json::json!("low")],
    );
    let high = pool.submit(
        SubmitOptions::new().with_priority(Priority::High),
        RECORD,
        vec![serde_json::json!("high")],
    );
    let normal = pool.submit(
        SubmitOptions::new().with_priority(Priority::Normal),
        RECORD,
        vec![serde_json::json!("normal")],
    );

    blocker.await.expect("blocker");
    high.await.expect("high");
    normal.await.expect("normal");
    low.await.expect("low");

    let observed = order.lock().unwrap().clone();
    assert_eq!(observed, vec!["high", "normal", "low"]);
    pool.close().await;
}

#[tokio::test]
async fn fifo_holds_within_a_band() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let pool = Pool::new(config(1), fixtures(Arc::clone(&order))).expect("pool");

    let mut tickets = vec![pool.submit(
        SubmitOptions::default(),
        BUSY_WAIT,
        vec![serde_json::json!(100)],
    )];
    for tag in ["n1", "n2", "n3"] {
        tickets.push(pool.submit(SubmitOptions::default(), RECORD, vec![serde_json::json!(tag)]));
    }
    for ticket in tickets {
        ticket.await.expect("job should resolve");
    }

    let observed = order.lock().unwrap().clone();
    assert_eq!(observed, vec!["n1", "n2", "n3"]);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  External cancellation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancelling_a_bound_job_rejects_and_replaces_the_worker() {
    let pool = Pool::new(config(1), table()).expect("pool");

    let cancel = CancelHandle::new();
    let ticket = pool.submit(
        SubmitOptions::new().with_cancel(cancel.clone()),
        BUSY_WAIT,
        vec![serde_json::json!(1000)],
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = ticket.await.expect_err("cancelled job should reject");
    assert!(matches!(err, PoolError::Cancelled));

    // Pool recovered.
    let value = pool
        .submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect("pool should still work");
    assert_eq!(value, serde_json::json!(42));
    pool.close().await;
}

#[tokio::test]
async fn cancelling_a_queued_job_removes_it_without_a_restart() {
    let pool = Pool::new(config(1), table()).expect("pool");

    let blocker = pool.submit(
        SubmitOptions::default(),
        BUSY_WAIT,
        vec![serde_json::json!(300)],
    );

    let cancel = CancelHandle::new();
    let queued = pool.submit(
        SubmitOptions::new().with_cancel(cancel.clone()),
        FORTY_TWO,
        vec![],
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = queued.await.expect_err("queued job should reject");
    assert!(matches!(err, PoolError::Cancelled));

    // The blocker is untouched and no worker was replaced.
    assert_eq!(blocker.await.expect("blocker"), serde_json::json!(300));
    assert_eq!(pool.metrics().worker_restarts, 0);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Strict-mode validation
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn strict_mode_rejects_banned_payloads_before_any_worker_sees_them() {
    let pool = Pool::new(config(2), table()).expect("pool");

    let payloads = [
        "(x) => require('os')",
        "() => eval('2 + 2')",
        "() => process.env.PATH",
    ];
    for payload in payloads {
        let err = pool
            .submit(SubmitOptions::default(), payload, vec![])
            .await
            .expect_err("payload should be rejected");
        assert!(
            matches!(err, PoolError::Validation { .. }),
            "unexpected error for {payload}: {err:?}"
        );
    }

    // Nothing was queued or executed.
    let metrics = pool.metrics();
    assert_eq!(metrics.completed_jobs, 0);
    assert_eq!(metrics.queue_depth, 0);
    assert_eq!(metrics.active_jobs, 0);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Crash recovery
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn crash_fails_the_bound_job_and_restores_the_worker_count() {
    let pool = Pool::new(config(2), table()).expect("pool");
    let before = pool.size();

    let err = pool
        .submit(SubmitOptions::default(), CRASH, vec![])
        .await
        .expect_err("crashing job should reject");
    match err {
        PoolError::WorkerCrash { cause } => assert!(cause.contains("simulated worker crash")),
        other => panic!("expected WorkerCrash, got {other:?}"),
    }

    // Restart in place preserves the pool size and leaves it operational.
    let value = pool
        .submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect("pool should recover");
    assert_eq!(value, serde_json::json!(42));
    assert_eq!(pool.size(), before);
    assert!(pool.metrics().worker_restarts >= 1);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Health-check eviction
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stalled_worker_is_evicted_and_its_job_requeued_at_the_front() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let table = fixtures(Arc::clone(&order));

    // Stalls hard on its first run, returns instantly afterwards.
    let first_run = Arc::new(AtomicBool::new(true));
    {
        let first_run = Arc::clone(&first_run);
        let order = Arc::clone(&order);
        table.register("() => stallOnce()", move |_| {
            if first_run.swap(false, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(600));
                Ok(serde_json::json!("stalled"))
            } else {
                order.lock().unwrap().push("stall".to_string());
                Ok(serde_json::json!("done"))
            }
        });
    }

    let cfg = config(1)
        .with_health_check_interval(Duration::from_millis(50))
        .with_max_inactivity(Duration::from_millis(150));
    let pool = Pool::new(cfg, table).expect("pool");

    let stall = pool.submit(SubmitOptions::default(), "() => stallOnce()", vec![]);
    let other = pool.submit(SubmitOptions::default(), RECORD, vec![serde_json::json!("other")]);

    let value = tokio::time::timeout(Duration::from_secs(2), stall)
        .await
        .expect("evicted job should be re-run, not stuck")
        .expect("second run should succeed");
    assert_eq!(value, serde_json::json!("done"));

    other.await.expect("queued job should run after");

    // Head re-queue: the evicted job ran before the job queued behind it.
    let observed = order.lock().unwrap().clone();
    assert_eq!(observed, vec!["stall", "other"]);
    assert!(pool.metrics().worker_restarts >= 1);
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Autoscaling
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn queue_pressure_scales_the_pool_up_to_its_ceiling() {
    let cfg = PoolConfig::new()
        .with_pool_size(1)
        .with_min_pool_size(1)
        .with_max_pool_size(3)
        .with_auto_scale(true)
        .with_scale_up_threshold(2);
    let pool = Pool::new(cfg, table()).expect("pool");

    let tickets: Vec<_> = (0..5)
        .map(|_| pool.submit(SubmitOptions::default(), BUSY_WAIT, vec![serde_json::json!(200)]))
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let size = pool.size();
    assert!(
        (2..=3).contains(&size),
        "expected scale-up within bounds, size = {size}"
    );

    for ticket in tickets {
        ticket.await.expect("job should resolve");
    }
    pool.close().await;
}

#[tokio::test]
async fn idle_workers_are_retired_down_to_the_floor() {
    let cfg = PoolConfig::new()
        .with_pool_size(3)
        .with_min_pool_size(1)
        .with_max_pool_size(3)
        .with_auto_scale(true)
        .with_scale_down_delay(Duration::from_millis(100))
        .with_health_check_interval(Duration::from_millis(50));
    let pool = Pool::new(cfg, table()).expect("pool");
    assert_eq!(pool.size(), 3);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(pool.size(), 1, "idle workers should retire to the floor");

    // The floor still serves work.
    let value = pool
        .submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect("job on the floor worker");
    assert_eq!(value, serde_json::json!(42));
    pool.close().await;
}

// ═══════════════════════════════════════════════════════════════════════
//  Shutdown
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn close_drains_queued_and_inflight_jobs() {
    let pool = Pool::new(config(2), table()).expect("pool");

    let tickets: Vec<_> = (0..5)
        .map(|_| pool.submit(SubmitOptions::default(), BUSY_WAIT, vec![serde_json::json!(100)]))
        .collect();

    let started = Instant::now();
    pool.close().await;
    assert!(
        started.elapsed() >= Duration::from_millis(200),
        "close should have waited for the backlog"
    );

    for ticket in tickets {
        ticket.await.expect("drained job should have completed");
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.queue_depth, 0);
    assert_eq!(metrics.active_jobs, 0);
    assert_eq!(metrics.completed_jobs, 5);
}

#[tokio::test]
async fn terminate_fails_inflight_work_and_clears_the_queue() {
    let pool = Pool::new(config(1), table()).expect("pool");

    let inflight = pool.submit(
        SubmitOptions::default(),
        BUSY_WAIT,
        vec![serde_json::json!(5000)],
    );
    let queued = pool.submit(SubmitOptions::default(), FORTY_TWO, vec![]);

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.terminate();
    pool.terminate(); // idempotent

    assert!(matches!(
        inflight.await,
        Err(PoolError::WorkerCrash { .. })
    ));
    assert!(matches!(queued.await, Err(PoolError::WorkerCrash { .. })));

    let err = pool
        .submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect_err("submit after terminate");
    assert!(matches!(err, PoolError::Closing));
}

// ═══════════════════════════════════════════════════════════════════════
//  Metrics accounting
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn completions_and_failures_account_for_every_observed_outcome() {
    let pool = Pool::new(config(2), table()).expect("pool");

    let mut observed = 0u64;
    for _ in 0..3 {
        pool.submit(SubmitOptions::default(), FORTY_TWO, vec![])
            .await
            .expect("ok job");
        observed += 1;
    }
    pool.submit(SubmitOptions::default(), THROW, vec![])
        .await
        .expect_err("user error");
    observed += 1;
    pool.submit(SubmitOptions::default(), "() => eval('x')", vec![])
        .await
        .expect_err("validation rejection");
    observed += 1;

    let metrics = pool.metrics();
    assert_eq!(metrics.completed_jobs, 3);
    assert_eq!(metrics.completed_jobs + metrics.failed_jobs, observed);
    assert!(metrics.avg_execution_ms <= metrics.total_execution_ms);
    pool.close().await;
}

#[tokio::test]
async fn reset_metrics_zeroes_counters() {
    let pool = Pool::new(config(1), table()).expect("pool");

    pool.submit(SubmitOptions::default(), FORTY_TWO, vec![])
        .await
        .expect("job");
    assert_eq!(pool.metrics().completed_jobs, 1);

    pool.reset_metrics();
    let metrics = pool.metrics();
    assert_eq!(metrics.completed_jobs, 0);
    assert_eq!(metrics.failed_jobs, 0);
    assert_eq!(metrics.worker_count, 1);
    pool.close().await;
}
