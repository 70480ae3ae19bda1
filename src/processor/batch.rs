//! Zip the rendered output of a batch's constituents into one archive.

use super::Processor;
use crate::artifacts::ArtifactStore;
use crate::error::{Error, Result};
use crate::model::BatchJob;
use crate::model::convert::pdf_file_name;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

pub struct BatchProcessor {
    artifacts: ArtifactStore,
}

impl BatchProcessor {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self { artifacts }
    }
}

#[async_trait]
impl Processor for BatchProcessor {
    type Job = BatchJob;

    async fn process(&self, job: &BatchJob) -> Result<()> {
        let archive = self.artifacts.archive(job.id);
        let sources: Vec<(PathBuf, String)> = job
            .entries
            .iter()
            .map(|entry| {
                (
                    self.artifacts.converted(entry.id),
                    pdf_file_name(&entry.file_name),
                )
            })
            .collect();

        let added = tokio::task::spawn_blocking(move || write_archive(&archive, &sources))
            .await
            .map_err(|e| Error::processing("archive", e))??;

        info!(
            job_id = %job.id,
            added,
            entries = job.entries.len(),
            "batch archive written"
        );
        Ok(())
    }
}

/// Write `sources` into a fresh zip at `archive`, skipping any whose rendered
/// file does not exist. Returns how many entries were added.
fn write_archive(archive: &Path, sources: &[(PathBuf, String)]) -> Result<usize> {
    let file = File::create(archive).map_err(|e| Error::processing("create archive", e))?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut names = EntryNames::default();
    let mut added = 0;

    for (path, name) in sources {
        let mut source = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "constituent not rendered, skipping");
                continue;
            }
            Err(e) => return Err(Error::processing("open constituent", e)),
        };

        zip.start_file(names.claim(name), options)
            .map_err(|e| Error::processing("archive", e))?;
        std::io::copy(&mut source, &mut zip).map_err(|e| Error::processing("archive", e))?;
        added += 1;
    }

    let mut writer = zip
        .finish()
        .map_err(|e| Error::processing("archive", e))?;
    writer
        .flush()
        .map_err(|e| Error::processing("archive", e))?;
    Ok(added)
}

/// Hands out unique entry names: a repeated `a.pdf` becomes `a (1).pdf`,
/// then `a (2).pdf`.
#[derive(Default)]
struct EntryNames {
    taken: HashSet<String>,
}

impl EntryNames {
    fn claim(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_string()) {
            return name.to_string();
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
            _ => (name, String::new()),
        };
        let mut n = 1;
        loop {
            let candidate = format!("{stem} ({n}){ext}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
