//! Submission, lookup and download resolution.
//!
//! These are the operations an HTTP layer calls: they create queued jobs for
//! the scheduler to pick up and present jobs back with the pool's in-progress
//! overlay applied.

use crate::artifacts::ArtifactStore;
use crate::clock::Clock;
use crate::db::{BatchJobs, ConvertJobs};
use crate::engine::TaskPool;
use crate::error::{Error, Result};
use crate::model::convert::pdf_file_name;
use crate::model::{BatchEntry, BatchJob, ConvertJob, Job, JobId, Lifecycle, Presented, Status};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Longest accepted file name, in characters.
pub const MAX_FILE_NAME_LEN: usize = 250;

/// Most ids honoured per request. Older ids beyond this are dropped.
pub const MAX_IDS_PER_REQUEST: usize = 200;

/// A job as a reader sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Tracked<J> {
    #[serde(flatten)]
    pub job: J,
    pub presented: Presented,
}

/// Where a finished artifact lives and what to call it when handing it out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub file_name: String,
}

pub struct Intake {
    conversions: ConvertJobs,
    batches: BatchJobs,
    artifacts: ArtifactStore,
    clock: Arc<dyn Clock>,
}

impl Intake {
    pub fn new(
        conversions: ConvertJobs,
        batches: BatchJobs,
        artifacts: ArtifactStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            conversions,
            batches,
            artifacts,
            clock,
        }
    }

    /// Store an uploaded document and queue it for conversion.
    ///
    /// `file_name` defaults to the source's own name.
    pub async fn submit_conversion(
        &self,
        source: &Path,
        file_name: Option<&str>,
    ) -> Result<ConvertJob> {
        let file_name = match file_name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        validate_file_name(&file_name)?;

        let id = JobId::new();
        let stored = self.artifacts.original(id);
        let file_size = tokio::fs::copy(source, &stored).await?;

        let job = ConvertJob {
            id,
            file_name,
            file_size: i64::try_from(file_size)
                .map_err(|_| Error::Invalid(format!("file too large: {file_size} bytes")))?,
            lifecycle: Lifecycle::queued(self.clock.now()),
        };
        if let Err(e) = self.conversions.insert(&job).await {
            if let Err(cleanup) = self.artifacts.remove(&stored).await {
                warn!(job_id = %id, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(e);
        }

        info!(job_id = %id, file_name = %job.file_name, file_size, "conversion queued");
        Ok(job)
    }

    /// Queue a zip of the given conversion jobs' output.
    pub async fn submit_batch(&self, ids: &[JobId]) -> Result<BatchJob> {
        if ids.is_empty() {
            return Err(Error::Invalid("no conversion ids given".to_string()));
        }
        let ids = keep_last(ids, MAX_IDS_PER_REQUEST);
        let found = self.conversions.find_many(ids).await?;

        let job = BatchJob {
            id: JobId::new(),
            entries: batch_entries(ids, found),
            lifecycle: Lifecycle::queued(self.clock.now()),
        };
        self.batches.insert(&job).await?;

        info!(
            job_id = %job.id,
            requested = ids.len(),
            entries = job.entries.len(),
            "batch queued"
        );
        Ok(job)
    }

    /// Look up conversion jobs in request order, unknown ids skipped.
    pub async fn conversions(
        &self,
        ids: &[JobId],
        pool: &TaskPool,
    ) -> Result<Vec<Tracked<ConvertJob>>> {
        let ids = keep_last(ids, MAX_IDS_PER_REQUEST);
        let found = self.conversions.find_many(ids).await?;
        Ok(track(ids, found, pool))
    }

    /// Look up batch jobs in request order, unknown ids skipped.
    pub async fn batches(&self, ids: &[JobId], pool: &TaskPool) -> Result<Vec<Tracked<BatchJob>>> {
        let ids = keep_last(ids, MAX_IDS_PER_REQUEST);
        let found = self.batches.find_many(ids).await?;
        Ok(track(ids, found, pool))
    }

    pub async fn conversion(&self, id: JobId) -> Result<ConvertJob> {
        self.conversions.get(id).await
    }

    pub async fn batch(&self, id: JobId) -> Result<BatchJob> {
        self.batches.get(id).await
    }

    /// The rendered PDF of a finished conversion job.
    pub async fn converted_download(&self, id: JobId) -> Result<Download> {
        let job = self.conversions.get(id).await?;
        self.ready(&job, self.artifacts.converted(id)).await?;
        Ok(Download {
            path: self.artifacts.converted(id),
            file_name: pdf_file_name(&job.file_name),
        })
    }

    /// The archive of a finished batch job.
    pub async fn archive_download(&self, id: JobId) -> Result<Download> {
        let job = self.batches.get(id).await?;
        self.ready(&job, self.artifacts.archive(id)).await?;
        Ok(Download {
            path: self.artifacts.archive(id),
            file_name: archive_file_name(id),
        })
    }

    async fn ready<J: Job>(&self, job: &J, path: PathBuf) -> Result<()> {
        let lc = job.lifecycle();
        if lc.status != Status::Done || lc.deleted || !self.artifacts.exists(&path).await? {
            return Err(Error::NotFound(format!(
                "{} output for {}",
                J::KIND,
                job.id()
            )));
        }
        Ok(())
    }
}

/// Reject names that are empty or longer than [`MAX_FILE_NAME_LEN`] characters.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Invalid("missing file name".to_string()));
    }
    if name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(Error::Invalid(format!(
            "file name longer than {MAX_FILE_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// The last `max` items of `ids`.
pub fn keep_last(ids: &[JobId], max: usize) -> &[JobId] {
    &ids[ids.len().saturating_sub(max)..]
}

/// Order `found` by `ids`, dropping repeats and ids that resolved to nothing.
pub fn batch_entries(ids: &[JobId], found: Vec<ConvertJob>) -> Vec<BatchEntry> {
    let mut by_id: HashMap<JobId, ConvertJob> = found.into_iter().map(|j| (j.id, j)).collect();
    ids.iter()
        .filter_map(|id| by_id.remove(id))
        .map(|job| BatchEntry {
            id: job.id,
            file_name: job.file_name,
        })
        .collect()
}

/// `converted-documents-<last five chars of the id>.zip`
pub fn archive_file_name(id: JobId) -> String {
    let id = id.to_string();
    let tail = &id[id.len().saturating_sub(5)..];
    format!("converted-documents-{tail}.zip")
}

fn track<J: Job>(ids: &[JobId], found: Vec<J>, pool: &TaskPool) -> Vec<Tracked<J>> {
    let mut by_id: HashMap<JobId, J> = found.into_iter().map(|j| (j.id(), j)).collect();
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| by_id.remove(id))
        .map(|job| {
            let presented = job.lifecycle().status.presented(pool.is_occupied(&job.id()));
            Tracked { job, presented }
        })
        .collect()
}
