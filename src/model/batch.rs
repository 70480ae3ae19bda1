//! Batch jobs: zip up the rendered output of several conversion jobs.

use super::{Job, JobId, JobKind, Lifecycle};
use crate::artifacts::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One constituent of a batch, captured when the batch was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: JobId,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    /// Ordered constituents. The archive lists them in this order.
    pub entries: Vec<BatchEntry>,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl Job for BatchJob {
    const KIND: JobKind = JobKind::Batch;

    fn id(&self) -> JobId {
        self.id
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn artifact_paths(&self, artifacts: &ArtifactStore) -> Vec<PathBuf> {
        vec![artifacts.archive(self.id)]
    }
}
