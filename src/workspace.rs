//! Per-job working directories.
//!
//! Layout under `{root}/{job_id}/`:
//!
//! ```text
//! input/{file name}          downloaded source document
//! output/{stem}.md           assembled document
//! output/text/               per-page caches (transcription + Markdown)
//! output/images/             rendered page images
//! ```
//!
//! A workspace is owned by exactly one job at a time, so nothing here locks.

use crate::coordinator::JobStage;
use crate::error::JobError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paths of one job's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    input_path: PathBuf,
    output_dir: PathBuf,
    text_dir: PathBuf,
    images_dir: PathBuf,
}

impl Workspace {
    /// Create (or reopen) the directory tree for `job_id`.
    ///
    /// `job_id` must already be sanitized; see [`crate::job::sanitize_job_id`].
    /// Existing contents are left in place, which is what lets a retried job
    /// find its caches.
    pub async fn prepare(
        parent: &Path,
        job_id: &str,
        input_file_name: &str,
    ) -> Result<Self, JobError> {
        let root = parent.join(job_id);
        let output_dir = root.join("output");
        let ws = Self {
            input_path: root.join("input").join(input_file_name),
            text_dir: output_dir.join("text"),
            images_dir: output_dir.join("images"),
            output_dir,
            root,
        };

        for dir in [ws.input_dir(), ws.text_dir.as_path(), ws.images_dir.as_path()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| JobError::Workspace {
                    stage: JobStage::PrepareWorkspace,
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        debug!("Prepared workspace {}", ws.root.display());
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the source document is stored.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    fn input_dir(&self) -> &Path {
        self.input_path.parent().unwrap_or(&self.root)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn text_dir(&self) -> &Path {
        &self.text_dir
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Input file name without its extension; prefixes every cache name.
    pub fn input_stem(&self) -> String {
        self.input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string())
    }

    /// Path of the assembled document.
    pub fn document_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.md", self.input_stem()))
    }

    /// Remove the whole tree. Failures are logged, never propagated: the
    /// job outcome has already been decided by the time this runs.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!("Removed workspace {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.root.display(), e),
        }
    }

    /// Every regular file under `output/`, as (absolute path, `/`-joined
    /// relative path) pairs sorted by relative path.
    pub async fn output_files(&self) -> Result<Vec<(PathBuf, String)>, JobError> {
        let mut files = Vec::new();
        let mut pending = vec![self.output_dir.clone()];

        while let Some(dir) = pending.pop() {
            let io_err = |source| JobError::Workspace {
                stage: JobStage::Publish,
                path: dir.clone(),
                source,
            };
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(io_err)?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let rel = path
                        .strip_prefix(&self.output_dir)
                        .unwrap_or(&path)
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    files.push((path, rel));
                }
            }
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }
}
