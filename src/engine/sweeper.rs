//! Cleanup sweeper: deletes artifacts of finished or abandoned jobs.
//!
//! A job is marked deleted only after every one of its artifacts is gone, so a
//! failed removal leaves the job eligible and it is tried again next sweep.

use crate::artifacts::{ArtifactStore, Removal};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::model::{Job, JobKind};
use crate::store::{JobStore, SweepQuery};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Queued jobs never picked up within this long are treated as abandoned.
pub const ABANDONED_AFTER: chrono::TimeDelta = chrono::TimeDelta::hours(24);

/// Most jobs handled by one sweep.
pub const SWEEP_PAGE_SIZE: usize = 1000;

/// Shortest accepted retention for finished jobs.
pub const MIN_DONE_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct SweepSettings {
    pub interval: Duration,
    /// How long a `done` job's artifacts are kept after it finished.
    pub done_threshold: chrono::TimeDelta,
    pub abandoned_after: chrono::TimeDelta,
    pub page_size: usize,
}

impl SweepSettings {
    pub fn new(interval: Duration, done_threshold: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("sweep interval must be positive".to_string()));
        }
        if done_threshold < MIN_DONE_THRESHOLD {
            return Err(Error::Config(format!(
                "sweep threshold must be at least {}s, got {:?}",
                MIN_DONE_THRESHOLD.as_secs(),
                done_threshold
            )));
        }
        let done_threshold = chrono::TimeDelta::from_std(done_threshold)
            .map_err(|e| Error::Config(format!("sweep threshold out of range: {e}")))?;
        Ok(Self {
            interval,
            done_threshold,
            abandoned_after: ABANDONED_AFTER,
            page_size: SWEEP_PAGE_SIZE,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fetched: usize,
    /// Eligible jobs in the store, fetched or not.
    pub total: i64,
    /// Jobs whose artifacts are gone and that are now marked deleted.
    pub cleaned: usize,
    /// Jobs left for the next sweep.
    pub failed: usize,
}

/// One sweeper per job class.
pub struct Sweeper<S: JobStore> {
    store: Arc<S>,
    artifacts: ArtifactStore,
    clock: Arc<dyn Clock>,
    settings: SweepSettings,
}

impl<S: JobStore> Sweeper<S> {
    pub fn new(
        store: Arc<S>,
        artifacts: ArtifactStore,
        clock: Arc<dyn Clock>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            settings,
        }
    }

    fn kind(&self) -> JobKind {
        <S::Job as Job>::KIND
    }

    /// Sweep until `shutdown` fires. The first sweep happens one interval in.
    pub async fn run(self, shutdown: CancellationToken) {
        let kind = self.kind();
        info!(class = %kind, interval = ?self.settings.interval, "sweeper started");

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(class = %kind, "sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(class = %kind, error = %e, "sweep failed");
                    }
                }
            }
        }
    }

    /// One bounded pass over eligible jobs.
    pub async fn tick(&self) -> Result<SweepReport> {
        let kind = self.kind();
        let class = KeyValue::new("class", kind.as_str());
        let now = self.clock.now();
        let query = SweepQuery {
            done_before: now - self.settings.done_threshold,
            queued_before: now - self.settings.abandoned_after,
            limit: self.settings.page_size,
        };

        let page = self.store.fetch_sweepable(&query).await.inspect_err(|_| {
            metrics::store_errors().add(
                1,
                &[class.clone(), KeyValue::new("operation", "fetch_sweepable")],
            );
        })?;

        let mut report = SweepReport {
            fetched: page.items.len(),
            total: page.total,
            ..SweepReport::default()
        };
        if page.items.is_empty() {
            return Ok(report);
        }

        for job in &page.items {
            if self.clean(job).await {
                report.cleaned += 1;
            } else {
                report.failed += 1;
            }
        }

        metrics::sweep_cleaned().add(report.cleaned as u64, &[class]);
        info!(
            class = %kind,
            fetched = report.fetched,
            cleaned = report.cleaned,
            failed = report.failed,
            total = report.total,
            "sweep finished"
        );
        Ok(report)
    }

    /// Remove every artifact of `job`, then mark it deleted.
    async fn clean(&self, job: &S::Job) -> bool {
        let kind = self.kind();
        let id = job.id();

        for path in job.artifact_paths(&self.artifacts) {
            match self.artifacts.remove(&path).await {
                Ok(Removal::Removed) => {
                    debug!(class = %kind, job_id = %id, path = %path.display(), "artifact removed");
                }
                Ok(Removal::Missing) => {}
                Err(e) => {
                    warn!(
                        class = %kind,
                        job_id = %id,
                        path = %path.display(),
                        error = %e,
                        "failed to remove artifact"
                    );
                    return false;
                }
            }
        }

        if let Err(e) = self.store.mark_deleted(id).await {
            error!(class = %kind, job_id = %id, error = %e, "failed to mark job deleted");
            metrics::store_errors().add(
                1,
                &[
                    KeyValue::new("class", kind.as_str()),
                    KeyValue::new("operation", "mark_deleted"),
                ],
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_below_a_minute_is_rejected() {
        let err = SweepSettings::new(Duration::from_secs(30), Duration::from_secs(59)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(SweepSettings::new(Duration::from_secs(30), Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(SweepSettings::new(Duration::ZERO, Duration::from_secs(120)).is_err());
    }

    #[test]
    fn defaults_follow_constants() {
        let s = SweepSettings::new(Duration::from_secs(30), Duration::from_secs(90)).unwrap();
        assert_eq!(s.abandoned_after, chrono::TimeDelta::hours(24));
        assert_eq!(s.page_size, 1000);
        assert_eq!(s.done_threshold, chrono::TimeDelta::seconds(90));
    }
}
