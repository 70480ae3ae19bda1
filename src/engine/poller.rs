//! Store poller: moves queued jobs from a [`JobStore`] into a [`TaskPool`].
//!
//! Adapted from the control-plane loop shape: a `tokio::select!` on the
//! shutdown token and a timer, with one bounded pass per tick.

use crate::clock::Clock;
use crate::engine::pool::TaskPool;
use crate::engine::retry::RetryPolicy;
use crate::error::Result;
use crate::model::{Job, JobId, JobKind, truncate_error};
use crate::processor::Processor;
use crate::store::{ClaimQuery, JobStore};
use crate::telemetry::job::{record_outcome, start_job_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Queued jobs older than this are left to the sweeper.
pub const FRESHNESS_WINDOW: chrono::TimeDelta = chrono::TimeDelta::hours(12);

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub freshness: chrono::TimeDelta,
    pub retry: RetryPolicy,
}

impl PollSettings {
    pub fn new(interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            interval,
            freshness: FRESHNESS_WINDOW,
            retry,
        }
    }
}

/// What one poll tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReport {
    /// The pool had no free slot; the store was not queried.
    NoCapacity,
    /// The store query failed; retried next tick.
    StoreError,
    /// Nothing eligible.
    Idle,
    Admitted {
        fetched: usize,
        admitted: usize,
        /// Eligible jobs in the store, fetched or not.
        total: i64,
    },
}

/// One poller per job class.
pub struct Poller<S, P>
where
    S: JobStore,
    P: Processor<Job = S::Job>,
{
    store: Arc<S>,
    processor: Arc<P>,
    pool: Arc<TaskPool>,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
}

impl<S, P> Poller<S, P>
where
    S: JobStore,
    P: Processor<Job = S::Job>,
{
    pub fn new(
        store: Arc<S>,
        processor: Arc<P>,
        pool: Arc<TaskPool>,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            processor,
            pool,
            clock,
            settings,
        }
    }

    fn kind(&self) -> JobKind {
        <S::Job as Job>::KIND
    }

    /// Poll until `shutdown` fires. The first poll happens one interval in.
    pub async fn run(self, shutdown: CancellationToken) {
        let kind = self.kind();
        info!(class = %kind, interval = ?self.settings.interval, "poller started");

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(class = %kind, "poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One bounded pass: fetch up to the pool's free slots and admit them.
    pub async fn tick(&self) -> PollReport {
        let kind = self.kind();
        let class = KeyValue::new("class", kind.as_str());

        let slots = self.pool.left_slots();
        if slots == 0 {
            debug!(class = %kind, "pool full, skipping poll");
            return PollReport::NoCapacity;
        }

        let query = ClaimQuery {
            exclude: self.pool.occupied_tokens(),
            created_after: self.clock.now() - self.settings.freshness,
            limit: slots,
        };
        let page = match self.store.fetch_claimable(&query).await {
            Ok(page) => page,
            Err(e) => {
                error!(class = %kind, error = %e, "failed to fetch queued jobs");
                metrics::store_errors()
                    .add(1, &[class, KeyValue::new("operation", "fetch_claimable")]);
                return PollReport::StoreError;
            }
        };

        metrics::poll_backlog().record(page.total.max(0) as u64, &[class.clone()]);
        if page.items.is_empty() {
            return PollReport::Idle;
        }

        let fetched = page.items.len();
        let mut admitted = 0;
        for job in page.items {
            let id = job.id();
            let store = Arc::clone(&self.store);
            let processor = Arc::clone(&self.processor);
            let clock = Arc::clone(&self.clock);
            let retry = self.settings.retry;
            let accepted = self.pool.add_task(id, move |_cancel| {
                execute(store, processor, clock, retry, job)
            });
            if accepted {
                admitted += 1;
            } else {
                warn!(class = %kind, job_id = %id, "job not admitted");
                metrics::jobs_rejected().add(1, &[class.clone()]);
            }
        }
        metrics::jobs_admitted().add(admitted as u64, &[class]);

        info!(
            class = %kind,
            fetched,
            admitted,
            total = page.total,
            "admitted queued jobs"
        );
        PollReport::Admitted {
            fetched,
            admitted,
            total: page.total,
        }
    }
}

/// Process one job with retries, then write its final status back.
async fn execute<S, P>(
    store: Arc<S>,
    processor: Arc<P>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    job: S::Job,
) where
    S: JobStore,
    P: Processor<Job = S::Job>,
{
    let kind = <S::Job as Job>::KIND;
    let id = job.id();
    let span = start_job_span(kind, id);
    let class = KeyValue::new("class", kind.as_str());
    let started = Instant::now();

    let outcome = async {
        let mut attempts = 0;
        let result = retry
            .run(|attempt| {
                attempts = attempt;
                metrics::job_attempts().add(1, &[class.clone()]);
                let processor = Arc::clone(&processor);
                let job = job.clone();
                async move { processor.process(&job).await }
            })
            .await;
        (result, attempts)
    }
    .instrument(span.clone())
    .await;

    let (result, attempts) = outcome;
    let label = if result.is_ok() { "done" } else { "error" };
    record_outcome(&span, label, attempts);
    metrics::jobs_finished().add(1, &[class.clone(), KeyValue::new("outcome", label)]);
    metrics::job_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &[class.clone()]);

    if let Err(e) = write_back(store.as_ref(), clock.as_ref(), id, result)
        .instrument(span)
        .await
    {
        // The job stays queued and is picked up again on a later poll.
        error!(class = %kind, job_id = %id, error = %e, "failed to record job outcome");
        metrics::store_errors().add(1, &[class, KeyValue::new("operation", "write_back")]);
    }
}

async fn write_back<S: JobStore>(
    store: &S,
    clock: &dyn Clock,
    id: JobId,
    result: Result<()>,
) -> Result<()> {
    match result {
        Ok(()) => store.mark_done(id, clock.now()).await,
        Err(e) => {
            let message = truncate_error(&e.to_string());
            warn!(job_id = %id, error = %message, "job failed");
            store.mark_error(id, &message).await
        }
    }
}
