//! Core data model.
//!
//! Two job classes share one lifecycle: a job is created `queued` and moves
//! exactly once to `done` or `error`. Whether a queued job is currently being
//! worked on is process-local knowledge held by the worker pool, never
//! persisted; [`Status::presented`] overlays it for readers.

pub mod batch;
pub mod convert;

pub use batch::{BatchEntry, BatchJob};
pub use convert::ConvertJob;

use crate::artifacts::ArtifactStore;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Persisted error messages are cut to this many characters.
pub const MAX_ERROR_LEN: usize = 1000;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Newtype for job IDs. Also the token a worker pool deduplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Time-ordered id, so ids sort roughly by submission.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Invalid(format!("bad job id {s:?}: {e}")))
    }
}

/// The two independent job classes. Each has its own table, pool and loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Conversion,
    Batch,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Conversion => "conversion",
            JobKind::Batch => "batch",
        }
    }

    /// Label readers see while a job of this kind is held by a worker.
    pub fn in_progress_label(self) -> &'static str {
        match self {
            JobKind::Conversion => "converting",
            JobKind::Batch => "batching",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Persisted status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker.
    Queued,
    /// Processed successfully. Terminal.
    Done,
    /// Processing failed. Terminal.
    Error,
}

impl Status {
    pub fn can_transition_to(self, to: Status) -> bool {
        matches!(
            (self, to),
            (Status::Queued, Status::Done) | (Status::Queued, Status::Error)
        )
    }

    /// What a reader should see, given whether the job's token is currently
    /// held by its pool.
    pub fn presented(self, occupied: bool) -> Presented {
        match self {
            Status::Queued if occupied => Presented::InProgress,
            Status::Queued => Presented::Queued,
            Status::Done => Presented::Done,
            Status::Error => Presented::Error,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Queued => "queued",
            Status::Done => "done",
            Status::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Status::Queued),
            "done" => Ok(Status::Done),
            "error" => Ok(Status::Error),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Status as presented to readers, including the in-memory in-progress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presented {
    Queued,
    InProgress,
    Done,
    Error,
}

impl Presented {
    pub fn label(self, kind: JobKind) -> &'static str {
        match self {
            Presented::Queued => "queued",
            Presented::InProgress => kind.in_progress_label(),
            Presented::Done => "done",
            Presented::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle fields shared by both job classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub status: Status,
    pub created_at: DateTime<Utc>,
    /// Set once, when the job reaches `done`.
    pub finished_at: Option<DateTime<Utc>>,
    /// Set once, when the job reaches `error`. At most [`MAX_ERROR_LEN`] chars.
    pub error: Option<String>,
    /// Artifacts were removed by the sweeper. Independent of `status`.
    pub deleted: bool,
}

impl Lifecycle {
    pub fn queued(created_at: DateTime<Utc>) -> Self {
        Self {
            status: Status::Queued,
            created_at,
            finished_at: None,
            error: None,
            deleted: false,
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(Status::Done)?;
        self.finished_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: &str) -> Result<()> {
        self.transition(Status::Error)?;
        self.error = Some(truncate_error(error));
        Ok(())
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    fn transition(&mut self, to: Status) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Cut an error message to its first [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((end, _)) => message[..end].to_string(),
        None => message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Behaviour common to every job class the engine schedules.
pub trait Job: Clone + Send + Sync + 'static {
    const KIND: JobKind;

    fn id(&self) -> JobId;

    fn lifecycle(&self) -> &Lifecycle;

    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Every on-disk artifact this job may own.
    fn artifact_paths(&self, artifacts: &ArtifactStore) -> Vec<PathBuf>;
}
