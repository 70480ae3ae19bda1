//! The work store contract the scheduling loops consume.
//!
//! One [`JobStore`] is a view over a single job class. Eligibility rules live
//! on [`ClaimQuery`] and [`SweepQuery`] so every backend applies the same ones:
//! the Postgres views express them in SQL, in-memory stores call `matches`.

use crate::error::Result;
use crate::model::{Job, JobId, Status};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A bounded slice of eligible jobs plus how many were eligible in total.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Queued jobs a poller may claim.
#[derive(Debug, Clone)]
pub struct ClaimQuery {
    /// Ids already held by the pool.
    pub exclude: HashSet<JobId>,
    /// Freshness window: older queued jobs are left for the sweeper.
    pub created_after: DateTime<Utc>,
    pub limit: usize,
}

impl ClaimQuery {
    pub fn matches<J: Job>(&self, job: &J) -> bool {
        let lc = job.lifecycle();
        lc.status == Status::Queued
            && lc.created_at >= self.created_after
            && !self.exclude.contains(&job.id())
    }
}

/// Jobs whose artifacts the sweeper may delete.
#[derive(Debug, Clone)]
pub struct SweepQuery {
    /// `done` jobs finished before this instant are eligible.
    pub done_before: DateTime<Utc>,
    /// `queued` jobs created before this instant are abandoned.
    pub queued_before: DateTime<Utc>,
    pub limit: usize,
}

impl SweepQuery {
    pub fn matches<J: Job>(&self, job: &J) -> bool {
        let lc = job.lifecycle();
        if lc.deleted {
            return false;
        }
        match lc.status {
            Status::Done => lc.finished_at.is_some_and(|at| at < self.done_before),
            Status::Error => true,
            Status::Queued => lc.created_at < self.queued_before,
        }
    }
}

/// Durable record of one job class. Safe to share between loops.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    type Job: Job;

    /// Newest-first queued jobs matching `query`, with the eligible total.
    async fn fetch_claimable(&self, query: &ClaimQuery) -> Result<Page<Self::Job>>;

    /// `queued -> done`, stamping the finish time.
    async fn mark_done(&self, id: JobId, at: DateTime<Utc>) -> Result<()>;

    /// `queued -> error`. `error` is already truncated.
    async fn mark_error(&self, id: JobId, error: &str) -> Result<()>;

    /// Jobs whose artifacts may be deleted, with the eligible total.
    async fn fetch_sweepable(&self, query: &SweepQuery) -> Result<Page<Self::Job>>;

    async fn mark_deleted(&self, id: JobId) -> Result<()>;
}
