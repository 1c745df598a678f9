//! Assembly: per-page Markdown, in page order, into one document.

use crate::coordinator::JobStage;
use crate::error::JobError;
use std::path::Path;

/// Separator between consecutive pages: one blank line.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Join pages in the order given. Callers pass pages sorted by number.
pub fn assemble<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Write the assembled document into the workspace.
pub async fn write_document(path: &Path, document: &str) -> Result<(), JobError> {
    tokio::fs::write(path, document)
        .await
        .map_err(|source| JobError::Workspace {
            stage: JobStage::Assemble,
            path: path.to_path_buf(),
            source,
        })
}
