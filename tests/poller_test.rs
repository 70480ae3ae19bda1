//! Integration tests for the store poller: backpressure, claim order,
//! retries and status write-back.

mod common;

use chrono::{DateTime, TimeDelta, Utc};
use common::{ManualClock, MemoryStore, TestProcessor, eventually};
use renderq::clock::Clock;
use renderq::config::Config;
use renderq::engine::{PollReport, PollSettings, Poller, RetryPolicy, TaskPool};
use renderq::model::{BatchEntry, BatchJob, ConvertJob, JobId, Lifecycle, MAX_ERROR_LEN, Status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

type Store = MemoryStore<ConvertJob>;
type Proc = TestProcessor<ConvertJob>;

fn job(created_at: DateTime<Utc>) -> ConvertJob {
    ConvertJob {
        id: JobId::new(),
        file_name: "report.docx".to_string(),
        file_size: 2048,
        lifecycle: Lifecycle::queued(created_at),
    }
}

struct Harness {
    store: Arc<Store>,
    processor: Arc<Proc>,
    pool: Arc<TaskPool>,
    clock: Arc<ManualClock>,
    poller: Poller<Store, Proc>,
}

fn harness(capacity: usize, processor: Proc, retry: RetryPolicy) -> Harness {
    let store = Store::new();
    let processor = Arc::new(processor);
    let pool = Arc::new(TaskPool::new(capacity, CancellationToken::new()));
    let clock = ManualClock::new(Utc::now());
    let poller = Poller::new(
        Arc::clone(&store),
        Arc::clone(&processor),
        Arc::clone(&pool),
        clock.clone(),
        PollSettings::new(Duration::from_millis(20), retry),
    );
    Harness {
        store,
        processor,
        pool,
        clock,
        poller,
    }
}

async fn wait_for_status(store: &Store, id: JobId, status: Status) {
    eventually(WAIT, || async { store.get(id).lifecycle.status == status }).await;
}

#[tokio::test]
async fn full_pool_skips_the_store_entirely() {
    let h = harness(1, Proc::succeeding(), RetryPolicy::none());
    h.store.insert(job(h.clock.now()));
    assert!(h.pool.add_task(JobId::new(), |_| async {}));
    assert_eq!(h.pool.left_slots(), 0);

    assert_eq!(h.poller.tick().await, PollReport::NoCapacity);
    assert_eq!(h.poller.tick().await, PollReport::NoCapacity);
    assert_eq!(h.store.claim_calls(), 0);
}

#[tokio::test]
async fn claims_newest_first_up_to_free_slots() {
    let h = harness(2, Proc::succeeding(), RetryPolicy::none());
    let now = h.clock.now();
    let oldest = job(now - TimeDelta::minutes(3));
    let middle = job(now - TimeDelta::minutes(2));
    let newest = job(now - TimeDelta::minutes(1));
    for j in [&oldest, &middle, &newest] {
        h.store.insert(j.clone());
    }

    // Workers are not started, so admitted jobs stay put.
    let report = h.poller.tick().await;
    assert_eq!(
        report,
        PollReport::Admitted {
            fetched: 2,
            admitted: 2,
            total: 3
        }
    );
    assert!(h.pool.is_occupied(&newest.id));
    assert!(h.pool.is_occupied(&middle.id));
    assert!(!h.pool.is_occupied(&oldest.id));
}

#[tokio::test]
async fn occupied_jobs_are_excluded_from_the_next_fetch() {
    let h = harness(3, Proc::succeeding(), RetryPolicy::none());
    let first = job(h.clock.now());
    h.store.insert(first.clone());
    assert!(matches!(h.poller.tick().await, PollReport::Admitted { admitted: 1, .. }));

    let second = job(h.clock.now() - TimeDelta::seconds(5));
    h.store.insert(second.clone());
    assert_eq!(
        h.poller.tick().await,
        PollReport::Admitted {
            fetched: 1,
            admitted: 1,
            total: 1
        }
    );
    assert_eq!(h.poller.tick().await, PollReport::Idle);
}

#[tokio::test]
async fn success_marks_done_with_finish_time() {
    let h = harness(2, Proc::succeeding(), RetryPolicy::none());
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());
    h.clock.advance(TimeDelta::seconds(3));

    h.poller.tick().await;
    wait_for_status(&h.store, j.id, Status::Done).await;

    let stored = h.store.get(j.id);
    assert_eq!(stored.lifecycle.finished_at, Some(h.clock.now()));
    assert!(stored.lifecycle.error.is_none());
    eventually(WAIT, || async { !h.pool.is_occupied(&j.id) }).await;
}

#[tokio::test(start_paused = true)]
async fn always_failing_job_is_tried_three_times_then_errors() {
    let h = harness(
        2,
        Proc::always_failing("renderer unreachable"),
        RetryPolicy::CONVERSION,
    );
    let started = tokio::time::Instant::now();
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());

    h.poller.tick().await;
    wait_for_status(&h.store, j.id, Status::Error).await;

    assert_eq!(h.processor.attempts(j.id), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
    let stored = h.store.get(j.id);
    assert_eq!(stored.lifecycle.error.as_deref(), Some("renderer unreachable"));
    assert!(stored.lifecycle.finished_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_within_budget() {
    let h = harness(2, Proc::failing_first(2, "flaky"), RetryPolicy::CONVERSION);
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());

    h.poller.tick().await;
    wait_for_status(&h.store, j.id, Status::Done).await;
    assert_eq!(h.processor.attempts(j.id), 3);
}

#[tokio::test]
async fn long_errors_are_persisted_truncated() {
    let message = "e".repeat(1500);
    let h = harness(1, Proc::always_failing(message.clone()), RetryPolicy::none());
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());

    h.poller.tick().await;
    wait_for_status(&h.store, j.id, Status::Error).await;

    let stored = h.store.get(j.id).lifecycle.error.unwrap();
    assert_eq!(stored.len(), MAX_ERROR_LEN);
    assert_eq!(stored, message[..MAX_ERROR_LEN]);
}

#[tokio::test]
async fn store_errors_abort_the_tick() {
    let h = harness(2, Proc::succeeding(), RetryPolicy::none());
    h.store.insert(job(h.clock.now()));
    h.store
        .fail_fetch
        .store(true, std::sync::atomic::Ordering::SeqCst);

    assert_eq!(h.poller.tick().await, PollReport::StoreError);
    assert!(h.pool.occupied_tokens().is_empty());

    h.store
        .fail_fetch
        .store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(h.poller.tick().await, PollReport::Admitted { admitted: 1, .. }));
}

#[tokio::test]
async fn failed_write_back_leaves_job_queued_for_reprocessing() {
    let h = harness(1, Proc::succeeding(), RetryPolicy::none());
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());
    h.store
        .fail_write_back
        .store(true, std::sync::atomic::Ordering::SeqCst);

    h.poller.tick().await;
    eventually(WAIT, || async { h.processor.calls() == 1 && !h.pool.is_occupied(&j.id) }).await;
    assert_eq!(h.store.get(j.id).lifecycle.status, Status::Queued);

    h.store
        .fail_write_back
        .store(false, std::sync::atomic::Ordering::SeqCst);
    h.poller.tick().await;
    wait_for_status(&h.store, j.id, Status::Done).await;
    assert_eq!(h.processor.calls(), 2);
}

#[tokio::test]
async fn stale_queued_jobs_are_never_claimed() {
    let h = harness(2, Proc::succeeding(), RetryPolicy::none());
    let stale = job(h.clock.now() - TimeDelta::hours(25));
    h.store.insert(stale.clone());

    assert_eq!(h.poller.tick().await, PollReport::Idle);
    assert!(!h.pool.is_occupied(&stale.id));

    // Just inside the freshness window is still claimable.
    let fresh = job(h.clock.now() - TimeDelta::hours(11));
    h.store.insert(fresh.clone());
    assert!(matches!(h.poller.tick().await, PollReport::Admitted { total: 1, .. }));
}

#[tokio::test]
async fn run_loop_processes_until_shutdown() {
    let h = harness(2, Proc::succeeding(), RetryPolicy::none());
    h.pool.start();
    let j = job(h.clock.now());
    h.store.insert(j.clone());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(h.poller.run(shutdown.clone()));

    wait_for_status(&h.store, j.id, Status::Done).await;
    shutdown.cancel();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();

    let calls = h.store.claim_calls();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.store.claim_calls(), calls, "poller kept polling after shutdown");
}

#[tokio::test]
async fn running_jobs_never_exceed_the_pool_limit() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        2,
        Proc::succeeding().gated(Arc::clone(&gate)),
        RetryPolicy::none(),
    );
    h.pool.start();
    let now = h.clock.now();
    let jobs: Vec<ConvertJob> = (1..=3).map(|m| job(now - TimeDelta::minutes(m))).collect();
    for j in &jobs {
        h.store.insert(j.clone());
    }

    assert!(matches!(h.poller.tick().await, PollReport::Admitted { admitted: 2, total: 3, .. }));
    eventually(WAIT, || async { h.processor.calls() == 2 }).await;
    assert_eq!(h.poller.tick().await, PollReport::NoCapacity);

    gate.add_permits(2);
    wait_for_status(&h.store, jobs[0].id, Status::Done).await;
    wait_for_status(&h.store, jobs[1].id, Status::Done).await;
    eventually(WAIT, || async { h.pool.left_slots() == 2 }).await;

    assert!(matches!(h.poller.tick().await, PollReport::Admitted { admitted: 1, .. }));
    gate.add_permits(1);
    wait_for_status(&h.store, jobs[2].id, Status::Done).await;
    assert_eq!(h.processor.max_active(), 2);
}

#[tokio::test]
async fn failed_batch_is_not_retried() {
    let config = Config::from_lookup(|name| {
        (name == "DATABASE_URL").then(|| "postgres://localhost/renderq".to_string())
    })
    .unwrap();
    let settings = config.batch_settings();

    let store = MemoryStore::<BatchJob>::new();
    let processor = Arc::new(TestProcessor::<BatchJob>::always_failing(
        "archive: disk full",
    ));
    let pool = Arc::new(TaskPool::new(settings.parallel_limit, CancellationToken::new()));
    let clock = ManualClock::new(Utc::now());
    let poller = Poller::new(
        Arc::clone(&store),
        Arc::clone(&processor),
        Arc::clone(&pool),
        clock.clone(),
        settings.poll,
    );
    pool.start();

    let batch = BatchJob {
        id: JobId::new(),
        entries: vec![BatchEntry {
            id: JobId::new(),
            file_name: "report.docx".to_string(),
        }],
        lifecycle: Lifecycle::queued(clock.now()),
    };
    store.insert(batch.clone());

    poller.tick().await;
    eventually(WAIT, || async {
        store.get(batch.id).lifecycle.status == Status::Error
    })
    .await;

    assert_eq!(processor.attempts(batch.id), 1);
    let stored = store.get(batch.id);
    assert_eq!(stored.lifecycle.error.as_deref(), Some("archive: disk full"));
    eventually(WAIT, || async { !pool.is_occupied(&batch.id) }).await;
    assert_eq!(processor.calls(), 1);
}
