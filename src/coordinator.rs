//! Per-job coordinator.
//!
//! Drives one job through
//! `VALIDATE → PREPARE_WORKSPACE → DOWNLOAD → EXTRACT → (TRANSCRIBE → RECONCILE) × N → ASSEMBLE → PUBLISH → DONE`.
//! Stages only move forward. Any failure ends the job with the error that
//! caused it; there is no partially successful outcome.

use crate::config::WorkerConfig;
use crate::convert::DocumentConverter;
use crate::error::{JobError, ModelError};
use crate::job::{Job, JobDescriptor, ObjectLocation, PipelineResult};
use crate::pipeline::publish;
use crate::storage::{self, ObjectStorage};
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, info_span, warn, Instrument};

/// Where a job is, or where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Validate,
    PrepareWorkspace,
    Download,
    Extract,
    Transcribe,
    Reconcile,
    Assemble,
    Publish,
    Done,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStage::Validate => "VALIDATE",
            JobStage::PrepareWorkspace => "PREPARE_WORKSPACE",
            JobStage::Download => "DOWNLOAD",
            JobStage::Extract => "EXTRACT",
            JobStage::Transcribe => "TRANSCRIBE",
            JobStage::Reconcile => "RECONCILE",
            JobStage::Assemble => "ASSEMBLE",
            JobStage::Publish => "PUBLISH",
            JobStage::Done => "DONE",
        })
    }
}

/// Forward-only record of the stage a job is in.
#[derive(Debug)]
struct StageTracker {
    current: JobStage,
}

impl StageTracker {
    fn new() -> Self {
        Self {
            current: JobStage::Validate,
        }
    }

    fn enter(&mut self, next: JobStage) -> Result<(), JobError> {
        if next < self.current {
            return Err(JobError::Internal {
                stage: self.current,
                detail: format!("illegal transition {} → {}", self.current, next),
            });
        }
        debug!(stage = %next, "Entering stage");
        self.current = next;
        Ok(())
    }
}

/// One lock per workspace directory currently in use.
///
/// A job holds its workspace's lock from preparation through cleanup, so a
/// redelivered copy of a running job waits instead of sharing (or deleting)
/// the directory under it.
#[derive(Default)]
struct WorkspaceLocks {
    held: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkspaceLocks {
    async fn acquire(&self, job_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody holds or waits on are stale.
            held.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(held.entry(job_id.to_string()).or_default())
        };
        match Arc::clone(&lock).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Workspace busy with another run of this job, waiting");
                lock.lock_owned().await
            }
        }
    }
}

/// Runs jobs end to end: download, convert, publish.
///
/// Shared by every worker in the pool. The only per-job state it keeps is
/// which workspaces are in use.
pub struct Pipeline {
    config: WorkerConfig,
    storage: Arc<dyn ObjectStorage>,
    converter: DocumentConverter,
    workspaces: WorkspaceLocks,
}

impl Pipeline {
    pub fn new(config: WorkerConfig, storage: Arc<dyn ObjectStorage>, converter: DocumentConverter) -> Self {
        Self {
            config,
            storage,
            converter,
            workspaces: WorkspaceLocks::default(),
        }
    }

    /// Production collaborators: storage and model backend from `config`,
    /// pdfium extraction.
    pub fn from_config(config: WorkerConfig) -> Result<Self, ModelError> {
        let storage = storage::from_config(&config.storage);
        let converter = DocumentConverter::from_config(&config)?;
        Ok(Self::new(config, storage, converter))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one job to completion or to its first failure.
    ///
    /// Validation happens before anything else: an invalid descriptor makes
    /// no storage or model call and touches no disk.
    pub async fn run(&self, descriptor: &JobDescriptor) -> Result<PipelineResult, JobError> {
        let job = descriptor.validate()?;
        let span = info_span!("job", job_id = %job.id);
        self.run_job(job).instrument(span).await
    }

    async fn run_job(&self, job: Job) -> Result<PipelineResult, JobError> {
        let start = Instant::now();
        let mut stages = StageTracker::new();
        info!(
            bucket = %job.source.bucket,
            key = %job.source.key,
            "Job accepted"
        );

        stages.enter(JobStage::PrepareWorkspace)?;
        let _exclusive = self.workspaces.acquire(&job.id).await;
        let workspace =
            Workspace::prepare(&self.config.workspace.root, &job.id, &job.input_file_name()).await?;

        let outcome = self.process(&job, &workspace, &mut stages).await;

        if self.config.workspace.cleanup.should_remove(outcome.is_ok()) {
            workspace.remove().await;
        }

        match &outcome {
            Ok(result) => info!(
                key = %result.destination.key,
                uploaded = result.uploaded_keys.len(),
                "Job done in {}ms",
                start.elapsed().as_millis()
            ),
            Err(e) => warn!(stage = %e.stage(), kind = e.kind(), "Job failed: {}", e),
        }
        outcome
    }

    async fn process(
        &self,
        job: &Job,
        workspace: &Workspace,
        stages: &mut StageTracker,
    ) -> Result<PipelineResult, JobError> {
        stages.enter(JobStage::Download)?;
        self.download(job, workspace).await?;

        // Extract through Assemble happen inside the converter.
        stages.enter(JobStage::Extract)?;
        let conversion = self.converter.convert(workspace).await?;

        stages.enter(JobStage::Publish)?;
        let document_key =
            publish::publish_document(self.storage.as_ref(), job, &conversion.markdown).await?;
        let mut uploaded_keys = vec![document_key.clone()];
        if self.config.publish_artifacts {
            uploaded_keys
                .extend(publish::publish_artifacts(self.storage.as_ref(), job, workspace).await?);
        }

        stages.enter(JobStage::Done)?;
        Ok(PipelineResult {
            source: job.source.clone(),
            destination: ObjectLocation {
                bucket: job.destination.bucket.clone(),
                key: document_key,
            },
            uploaded_keys,
        })
    }

    async fn download(&self, job: &Job, workspace: &Workspace) -> Result<(), JobError> {
        let bytes = self
            .storage
            .get(&job.source.bucket, &job.source.key)
            .await
            .map_err(|source| JobError::DownloadFailure {
                bucket: job.source.bucket.clone(),
                key: job.source.key.clone(),
                source,
            })?;

        let path = workspace.input_path();
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|source| JobError::Workspace {
                stage: JobStage::Download,
                path: path.to_path_buf(),
                source,
            })?;
        info!("Downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}
