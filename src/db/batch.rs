//! Batch job storage. Entries are kept as a JSONB array on the job row.

use super::ensure_transitioned;
use crate::error::{Error, Result};
use crate::model::{BatchEntry, BatchJob, JobId, Lifecycle, Status};
use crate::store::{ClaimQuery, JobStore, Page, SweepQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

const COLUMNS: &str =
    "id, entries, status, created_at, batched_at, error, is_archive_deleted";

const CLAIMABLE: &str = "WHERE status = 'queued' AND created_at >= $1 AND NOT (id = ANY($2))";

const SWEEPABLE: &str = "WHERE ((status = 'done' AND batched_at < $1)
        OR status = 'error'
        OR (status = 'queued' AND created_at < $2))
    AND is_archive_deleted = FALSE";

/// Store view over the `batch_jobs` table.
#[derive(Clone)]
pub struct BatchJobs {
    pool: PgPool,
}

impl BatchJobs {
    pub(super) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &BatchJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_jobs (id, entries, status, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id.0)
        .bind(Json(&job.entries))
        .bind(job.lifecycle.status.to_string())
        .bind(job.lifecycle.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a batch job by ID.
    pub async fn get(&self, id: JobId) -> Result<BatchJob> {
        let row: Option<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM batch_jobs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("batch job {id}")))?
            .try_into_job()
    }

    /// Jobs with the given ids, in no particular order. Unknown ids are skipped.
    pub async fn find_many(&self, ids: &[JobId]) -> Result<Vec<BatchJob>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows: Vec<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM batch_jobs WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BatchJobRow::try_into_job).collect()
    }
}

#[async_trait]
impl JobStore for BatchJobs {
    type Job = BatchJob;

    async fn fetch_claimable(&self, query: &ClaimQuery) -> Result<Page<BatchJob>> {
        let exclude: Vec<Uuid> = query.exclude.iter().map(|id| id.0).collect();

        let rows: Vec<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM batch_jobs {CLAIMABLE}
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(query.created_after)
        .bind(&exclude)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM batch_jobs {CLAIMABLE}"))
                .bind(query.created_after)
                .bind(&exclude)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(BatchJobRow::try_into_job)
                .collect::<Result<_>>()?,
            total,
        })
    }

    async fn mark_done(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE batch_jobs SET status = 'done', batched_at = $2
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id.0)
        .bind(at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        ensure_transitioned(rows_affected, Status::Done)
    }

    async fn mark_error(&self, id: JobId, error: &str) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE batch_jobs SET status = 'error', error = $2
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id.0)
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        ensure_transitioned(rows_affected, Status::Error)
    }

    async fn fetch_sweepable(&self, query: &SweepQuery) -> Result<Page<BatchJob>> {
        let rows: Vec<BatchJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM batch_jobs {SWEEPABLE}
             ORDER BY created_at ASC LIMIT $3"
        ))
        .bind(query.done_before)
        .bind(query.queued_before)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM batch_jobs {SWEEPABLE}"))
                .bind(query.done_before)
                .bind(query.queued_before)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(BatchJobRow::try_into_job)
                .collect::<Result<_>>()?,
            total,
        })
    }

    async fn mark_deleted(&self, id: JobId) -> Result<()> {
        sqlx::query("UPDATE batch_jobs SET is_archive_deleted = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct BatchJobRow {
    id: Uuid,
    entries: Json<Vec<BatchEntry>>,
    status: String,
    created_at: DateTime<Utc>,
    batched_at: Option<DateTime<Utc>>,
    error: Option<String>,
    is_archive_deleted: bool,
}

impl BatchJobRow {
    fn try_into_job(self) -> Result<BatchJob> {
        Ok(BatchJob {
            id: JobId(self.id),
            entries: self.entries.0,
            lifecycle: Lifecycle {
                status: self.status.parse()?,
                created_at: self.created_at,
                finished_at: self.batched_at,
                error: self.error,
                deleted: self.is_archive_deleted,
            },
        })
    }
}
