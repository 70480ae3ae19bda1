//! Render one uploaded document into a PDF next to it.

use super::Processor;
use crate::artifacts::ArtifactStore;
use crate::error::{Error, Result};
use crate::model::ConvertJob;
use crate::renderer::Renderer;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

pub struct ConvertProcessor {
    artifacts: ArtifactStore,
    renderer: Arc<dyn Renderer>,
}

impl ConvertProcessor {
    pub fn new(artifacts: ArtifactStore, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            artifacts,
            renderer,
        }
    }
}

#[async_trait]
impl Processor for ConvertProcessor {
    type Job = ConvertJob;

    async fn process(&self, job: &ConvertJob) -> Result<()> {
        let source = tokio::fs::File::open(self.artifacts.original(job.id))
            .await
            .map_err(|e| Error::processing("open source", e))?;

        let mut rendered = self.renderer.render(&job.file_name, source).await?;

        // Truncates whatever an earlier attempt left behind.
        let mut output = tokio::fs::File::create(self.artifacts.converted(job.id))
            .await
            .map_err(|e| Error::processing("create output", e))?;

        let mut written: u64 = 0;
        while let Some(chunk) = rendered.next().await {
            let chunk = chunk?;
            output
                .write_all(&chunk)
                .await
                .map_err(|e| Error::processing("write output", e))?;
            written += chunk.len() as u64;
        }
        output
            .flush()
            .await
            .map_err(|e| Error::processing("write output", e))?;

        info!(job_id = %job.id, bytes = written, "document converted");
        Ok(())
    }
}
