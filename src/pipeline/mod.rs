//! Pipeline stages for one document.
//!
//! Each submodule implements exactly one step. Keeping stages separate
//! makes each independently testable and keeps the per-page loop in
//! [`crate::convert`] short.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ ┌ transcribe ──▶ reconcile ┐ × N ──▶ assemble ──▶ publish
//! (pdfium)    │ (vision)       (text)    │         (join)       (storage)
//!             └──── one page at a time ──┘
//! ```
//!
//! 1. [`extract`]:    parsed text per page and one PNG per page
//! 2. [`encode`]:     base64 a rendered page for the request body
//! 3. [`transcribe`]: vision reading of the page, cached per page
//! 4. [`reconcile`]:  Markdown from transcription + parsed text, cached
//! 5. [`postprocess`]: strip an outer fence, annotate the leading heading
//! 6. [`assemble`]:   join pages in order into one document
//! 7. [`publish`]:    upload the document (and optionally every artifact)

pub mod assemble;
pub mod encode;
pub mod extract;
pub mod postprocess;
pub mod publish;
pub mod reconcile;
pub mod transcribe;

use crate::cache::CacheStore;
use crate::model::GenerativeModel;
use std::path::Path;

/// Collaborators shared by the per-page stages of one document.
pub struct StageContext<'a> {
    pub model: &'a dyn GenerativeModel,
    pub cache: &'a dyn CacheStore,
    /// Model used for the transcription call.
    pub vision_model: &'a str,
    /// Model used for the reconciliation call.
    pub text_model: &'a str,
    /// Input file stem; prefixes every cache key.
    pub stem: &'a str,
}

/// Everything the stages know about one page before any model call.
#[derive(Debug, Clone, Copy)]
pub struct PageInput<'a> {
    pub page: usize,
    pub parsed_text: &'a str,
    pub image_path: &'a Path,
}

/// A stage result and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub text: String,
    pub cached: bool,
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::ModelError;
    use crate::model::{GenerateRequest, GenerativeModel};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers with `reply(request)` and records every request.
    pub struct RecordingModel {
        pub requests: Mutex<Vec<GenerateRequest>>,
        reply: fn(&GenerateRequest) -> Result<String, ModelError>,
    }

    impl RecordingModel {
        pub fn new(reply: fn(&GenerateRequest) -> Result<String, ModelError>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply,
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerativeModel for RecordingModel {
        async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            (self.reply)(request)
        }
    }
}
