//! Artifact filesystem: uploaded originals, rendered output and batch archives,
//! all keyed by job id under one root directory.

use crate::error::Result;
use crate::model::JobId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What happened when an artifact was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Nothing was there: already removed, or never produced.
    Missing,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        debug!(root = %self.root.display(), "artifact root ready");
        Ok(())
    }

    /// The document as uploaded.
    pub fn original(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// The renderer's output for a conversion job.
    pub fn converted(&self, id: JobId) -> PathBuf {
        self.root.join(format!("{id}_converted"))
    }

    /// The zip produced for a batch job.
    pub fn archive(&self, id: JobId) -> PathBuf {
        self.root.join(format!("{id}.zip"))
    }

    /// Remove one artifact. A missing file is not an error.
    pub async fn remove(&self, path: &Path) -> Result<Removal> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(Removal::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an artifact is currently present.
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }
}
