//! Single-file conversion jobs.

use super::{Job, JobId, JobKind, Lifecycle};
use crate::artifacts::ArtifactStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An uploaded document waiting to be (or already) rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertJob {
    pub id: JobId,
    /// Client-supplied file name, as uploaded.
    pub file_name: String,
    pub file_size: i64,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

impl Job for ConvertJob {
    const KIND: JobKind = JobKind::Conversion;

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
        vec![artifacts.original(self.id), artifacts.converted(self.id)]
    }
}

/// Name a rendered document is offered under: the uploaded name with any
/// directory part dropped and `.pdf` appended.
pub fn pdf_file_name(file_name: &str) -> String {
    let base = Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "document".to_string());
    format!("{base}.pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_file_name_appends_extension() {
        assert_eq!(pdf_file_name("report.docx"), "report.docx.pdf");
        assert_eq!(pdf_file_name("notes"), "notes.pdf");
        assert_ne!(pdf_file_name("report.docx"), pdf_file_name("report.doc"));
    }

    #[test]
    fn pdf_file_name_drops_directories() {
        assert_eq!(pdf_file_name("../../etc/passwd.doc"), "passwd.doc.pdf");
        assert_eq!(pdf_file_name(""), "document.pdf");
        assert_eq!(pdf_file_name(".."), "document.pdf");
    }
}
