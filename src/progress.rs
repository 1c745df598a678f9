//! Progress callbacks for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] into
//! [`crate::convert::DocumentConverter::with_progress`] to observe a
//! conversion as it walks the pages. The binary uses it to drive an
//! `indicatif` progress bar; the worker pool leaves the no-op default.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_worker::{CacheHit, PipelineProgress};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineProgress for Counter {
//!     fn on_page_complete(&self, page: usize, total: usize, _len: usize, hit: CacheHit) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page}/{total} ({hit})");
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

/// Which cache, if any, served a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHit {
    /// Both model calls were made.
    None,
    /// The transcription was cached; only reconciliation ran.
    Transcription,
    /// The final Markdown was cached; no model call was made.
    Markdown,
}

impl fmt::Display for CacheHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheHit::None => "computed",
            CacheHit::Transcription => "transcription cached",
            CacheHit::Markdown => "cached",
        })
    }
}

/// Called by the pipeline as it processes one document.
///
/// Pages inside a document are processed one at a time, so calls for one
/// document never overlap. A single implementation shared between jobs in a
/// worker pool will be called concurrently, hence `Send + Sync`.
pub trait PipelineProgress: Send + Sync {
    /// Once, after extraction, with the authoritative page count.
    fn on_job_start(&self, document: &str, total_pages: usize) {
        let _ = (document, total_pages);
    }

    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// A page's final Markdown is available.
    fn on_page_complete(&self, page: usize, total_pages: usize, markdown_len: usize, hit: CacheHit) {
        let _ = (page, total_pages, markdown_len, hit);
    }

    /// A page failed; the document is about to be abandoned.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Once, after the document has been assembled.
    fn on_job_complete(&self, document: &str, total_pages: usize) {
        let _ = (document, total_pages);
    }
}

/// Ignores every event. The default.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

pub type ProgressCallback = Arc<dyn PipelineProgress>;
