//! # pdf2md-worker
//!
//! Convert queued PDF documents into reconciled Markdown.
//!
//! Each page is read twice: once through the document's own text layer
//! (parsed text) and once by a vision model looking at the rendered page
//! (transcription). A second, text-only model call merges the two into the
//! page's Markdown, preferring parsed text wherever they disagree.
//!
//! ## Pipeline Overview
//!
//! ```text
//! job descriptor
//!  │
//!  ├─ 1. Validate   required fields, before any I/O
//!  ├─ 2. Workspace  {root}/{job_id}/ with input/ and output/{text,images}/
//!  ├─ 3. Download   source object → input/
//!  ├─ 4. Extract    parsed text + one PNG per page (pdfium, spawn_blocking)
//!  ├─ 5. Per page   transcribe → reconcile, one page at a time, cached
//!  ├─ 6. Assemble   pages joined in order by a blank line
//!  └─ 7. Publish    {prefix}{sourceKey}.md as text/markdown
//! ```
//!
//! Every per-page stage result is cached in the workspace. A job that fails
//! at page K and is redelivered skips straight to page K; a job run twice
//! makes no model call the second time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_worker::{JobDescriptor, Pipeline, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkerConfig::builder().build()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!     let descriptor: JobDescriptor = serde_json::from_str(
//!         r#"{"sourceBucket":"inbox","sourceKey":"report.pdf","outputBucket":"results"}"#,
//!     )?;
//!     let result = pipeline.run(&descriptor).await?;
//!     println!("published {}", result.destination.key);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-worker` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod queue;
pub mod storage;
pub mod worker;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheStore, FsCacheStore, MemoryCacheStore};
pub use config::{
    CleanupPolicy, ConfigError, ModelBackend, ModelConfig, RenderConfig, StorageConfig,
    WorkerConfig, WorkerConfigBuilder, WorkspaceConfig,
};
pub use convert::{Conversion, ConversionStats, DocumentConverter};
pub use coordinator::{JobStage, Pipeline};
pub use error::{CacheError, ExtractError, JobError, ModelError, PageStageError, StorageError};
pub use job::{Destination, Job, JobDescriptor, ObjectLocation, PipelineResult};
pub use model::{GenerateClient, GenerateRequest, GenerativeModel, ProviderModel};
pub use pipeline::extract::{PageExtractor, PageImage, PageText, PdfiumExtractor};
pub use progress::{CacheHit, NoopProgress, PipelineProgress, ProgressCallback};
pub use queue::{read_job_lines, JobFailure, JobReport, JobStatus, QueuedJob};
pub use storage::{LocalStorage, MemoryStorage, ObjectStorage, S3Storage};
pub use worker::{cancel_on_shutdown, spawn_worker_pool, WorkerPool};
pub use workspace::Workspace;
