//! Error types for the pdf2md-worker library.
//!
//! Two layers of errors reflect two layers of the system:
//!
//! * [`JobError`]: **Fatal to a job**: the conversion of one document
//!   cannot complete. Every variant maps onto exactly one [`JobStage`], so a
//!   failure report can say *where* the job died without string matching.
//!
//! * Collaborator errors ([`ModelError`], [`StorageError`], [`CacheError`],
//!   [`ExtractError`]) describe what went wrong inside one external
//!   dependency. They never escape on their own; the coordinator wraps them
//!   as the `#[source]` of the matching `JobError` variant.
//!
//! There are no non-fatal page errors here: a single page failing aborts the
//! whole job, and the per-page caches already written are what make the next
//! attempt cheap.

use crate::coordinator::JobStage;
use std::path::PathBuf;
use thiserror::Error;

/// All job-fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum JobError {
    // ── Validation ────────────────────────────────────────────────────────
    /// The job descriptor lacks one or more required fields.
    #[error("Invalid job input: missing {}", missing.join(", "))]
    InvalidJobInput { missing: Vec<&'static str> },

    // ── Workspace ─────────────────────────────────────────────────────────
    /// A file or directory in the per-job workspace could not be created,
    /// written or read. `stage` is the stage that touched it.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        stage: JobStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Transfer errors ───────────────────────────────────────────────────
    /// The source object could not be fetched.
    #[error("Failed to download {bucket}/{key}: {source}")]
    DownloadFailure {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    /// The assembled document (or an artifact) could not be uploaded.
    #[error("Failed to upload {bucket}/{key}: {source}")]
    PublishFailure {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// Text or image extraction from the source document failed entirely.
    #[error("Extraction failed for '{path}': {source}")]
    ExtractionFailure {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    /// The vision transcription of one page failed.
    #[error("Transcription failed for page {page}: {source}")]
    PageTranscriptionFailure {
        page: usize,
        #[source]
        source: PageStageError,
    },

    /// The reconciliation of one page into Markdown failed.
    #[error("Reconciliation failed for page {page}: {source}")]
    PageReconciliationFailure {
        page: usize,
        #[source]
        source: PageStageError,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error during `stage`.
    #[error("Internal error during {stage}: {detail}")]
    Internal { stage: JobStage, detail: String },
}

impl JobError {
    /// The pipeline stage this failure originated from.
    pub fn stage(&self) -> JobStage {
        match self {
            JobError::InvalidJobInput { .. } => JobStage::Validate,
            JobError::Workspace { stage, .. } => *stage,
            JobError::DownloadFailure { .. } => JobStage::Download,
            JobError::ExtractionFailure { .. } => JobStage::Extract,
            JobError::PageTranscriptionFailure { .. } => JobStage::Transcribe,
            JobError::PageReconciliationFailure { .. } => JobStage::Reconcile,
            JobError::PublishFailure { .. } => JobStage::Publish,
            JobError::Internal { stage, .. } => *stage,
        }
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::InvalidJobInput { .. } => "InvalidJobInput",
            JobError::Workspace { .. } => "WorkspaceFailure",
            JobError::DownloadFailure { .. } => "DownloadFailure",
            JobError::ExtractionFailure { .. } => "ExtractionFailure",
            JobError::PageTranscriptionFailure { .. } => "PageTranscriptionFailure",
            JobError::PageReconciliationFailure { .. } => "PageReconciliationFailure",
            JobError::PublishFailure { .. } => "PublishFailure",
            JobError::Internal { .. } => "Internal",
        }
    }

    /// Whether redelivering the same descriptor can possibly succeed.
    ///
    /// Only validation failures are deterministic; everything else may be
    /// transient (network, model service, disk space).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::InvalidJobInput { .. })
    }

    /// The page number carried by page-scoped failures.
    pub fn page(&self) -> Option<usize> {
        match self {
            JobError::PageTranscriptionFailure { page, .. }
            | JobError::PageReconciliationFailure { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// What went wrong inside a per-page stage.
#[derive(Debug, Error)]
pub enum PageStageError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The rendered page image could not be read back for encoding.
    #[error("Failed to read page image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the generative-model service.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The request never produced an HTTP response.
    #[error("Request to '{url}' failed: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-2xx status.
    #[error("Model service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A 2xx response whose body was not the expected JSON.
    #[error("Invalid response from model service: {0}")]
    InvalidResponse(String),

    /// An `edgequake-llm` provider could not be created or failed a call.
    #[error("LLM provider '{provider}' failed: {detail}")]
    Provider { provider: String, detail: String },
}

/// Errors from the object-storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The S3 backend rejected or failed the request.
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// The local-directory backend hit a filesystem error.
    #[error("Storage I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The storage client could not be configured.
    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// Errors from a [`crate::cache::CacheStore`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a [`crate::pipeline::extract::PageExtractor`].
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file does not start with the `%PDF` magic bytes.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set --pdfium-lib-dir (PDFIUM_LIB_DIR) to the directory holding libpdfium."
    )]
    PdfiumBindingFailed(String),

    /// pdfium could not open the document.
    #[error("PDF could not be opened: {0}")]
    CorruptPdf(String),

    /// A page could not be rasterised.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Rendered pages are not numbered 1..=N in order.
    #[error("Rendered pages out of sequence: expected page {expected}, found page {found}")]
    NonContiguousPages { expected: usize, found: usize },

    /// A rendered page image could not be written.
    #[error("Failed to write page image '{path}': {detail}")]
    ImageWrite { path: PathBuf, detail: String },

    /// Reading the document from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking extraction task panicked.
    #[error("Extraction task panicked: {0}")]
    TaskPanicked(String),
}
