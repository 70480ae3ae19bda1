//! Conversion job storage.

use super::ensure_transitioned;
use crate::error::{Error, Result};
use crate::model::{ConvertJob, JobId, Lifecycle, Status};
use crate::store::{ClaimQuery, JobStore, Page, SweepQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str =
    "id, file_name, file_size, status, created_at, converted_at, error, is_file_deleted";

const CLAIMABLE: &str = "WHERE status = 'queued' AND created_at >= $1 AND NOT (id = ANY($2))";

const SWEEPABLE: &str = "WHERE ((status = 'done' AND converted_at < $1)
        OR status = 'error'
        OR (status = 'queued' AND created_at < $2))
    AND is_file_deleted = FALSE";

/// Store view over the `conversion_jobs` table.
#[derive(Clone)]
pub struct ConvertJobs {
    pool: PgPool,
}

impl ConvertJobs {
    pub(super) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &ConvertJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversion_jobs (id, file_name, file_size, status, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id.0)
        .bind(&job.file_name)
        .bind(job.file_size)
        .bind(job.lifecycle.status.to_string())
        .bind(job.lifecycle.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a conversion job by ID.
    pub async fn get(&self, id: JobId) -> Result<ConvertJob> {
        let row: Option<ConvertJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversion_jobs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("conversion job {id}")))?
            .try_into_job()
    }

    /// Jobs with the given ids, in no particular order. Unknown ids are skipped.
    pub async fn find_many(&self, ids: &[JobId]) -> Result<Vec<ConvertJob>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let rows: Vec<ConvertJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversion_jobs WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConvertJobRow::try_into_job).collect()
    }
}

#[async_trait]
impl JobStore for ConvertJobs {
    type Job = ConvertJob;

    async fn fetch_claimable(&self, query: &ClaimQuery) -> Result<Page<ConvertJob>> {
        let exclude: Vec<Uuid> = query.exclude.iter().map(|id| id.0).collect();

        let rows: Vec<ConvertJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversion_jobs {CLAIMABLE}
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(query.created_after)
        .bind(&exclude)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM conversion_jobs {CLAIMABLE}"))
                .bind(query.created_after)
                .bind(&exclude)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(ConvertJobRow::try_into_job)
                .collect::<Result<_>>()?,
            total,
        })
    }

    async fn mark_done(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE conversion_jobs SET status = 'done', converted_at = $2
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
            "UPDATE conversion_jobs SET status = 'error', error = $2
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id.0)
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        ensure_transitioned(rows_affected, Status::Error)
    }

    async fn fetch_sweepable(&self, query: &SweepQuery) -> Result<Page<ConvertJob>> {
        let rows: Vec<ConvertJobRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM conversion_jobs {SWEEPABLE}
             ORDER BY created_at ASC LIMIT $3"
        ))
        .bind(query.done_before)
        .bind(query.queued_before)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM conversion_jobs {SWEEPABLE}"))
                .bind(query.done_before)
                .bind(query.queued_before)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(ConvertJobRow::try_into_job)
                .collect::<Result<_>>()?,
            total,
        })
    }

    async fn mark_deleted(&self, id: JobId) -> Result<()> {
        sqlx::query("UPDATE conversion_jobs SET is_file_deleted = TRUE WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ConvertJobRow {
    id: Uuid,
    file_name: String,
    file_size: i64,
    status: String,
    created_at: DateTime<Utc>,
    converted_at: Option<DateTime<Utc>>,
    error: Option<String>,
    is_file_deleted: bool,
}

impl ConvertJobRow {
    fn try_into_job(self) -> Result<ConvertJob> {
        Ok(ConvertJob {
            id: JobId(self.id),
            file_name: self.file_name,
            file_size: self.file_size,
            lifecycle: Lifecycle {
                status: self.status.parse()?,
                created_at: self.created_at,
                finished_at: self.converted_at,
                error: self.error,
                deleted: self.is_file_deleted,
            },
        })
    }
}
