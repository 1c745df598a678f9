//! Document conversion: extract → per-page transcribe/reconcile → assemble.
//!
//! [`DocumentConverter`] turns the PDF sitting in a [`Workspace`] into one
//! Markdown document. It knows nothing about queues or object storage; the
//! [`crate::coordinator`] wraps it with download and publish, and
//! [`DocumentConverter::convert_file`] wraps it for local files.
//!
//! ## Page loop
//!
//! Pages run strictly one at a time in ascending order. For page N:
//!
//! 1. final Markdown cached? use it, skip both calls
//! 2. otherwise transcription (cached or requested)
//! 3. then reconciliation (requested, post-processed, cached)
//!
//! The first page failure aborts the document. Entries already cached are
//! left in place, so the next attempt resumes at the failed page.

use crate::cache::{CacheStore, FsCacheStore};
use crate::config::{WorkerConfig, WorkspaceConfig};
use crate::coordinator::JobStage;
use crate::error::{ExtractError, JobError, ModelError};
use crate::job::sanitize_job_id;
use crate::model::{self, GenerativeModel};
use crate::pipeline::extract::{check_pdf_magic, PageExtractor, PageImage, PageText, PdfiumExtractor};
use crate::pipeline::{assemble, reconcile, transcribe, PageInput, StageContext};
use crate::progress::{CacheHit, NoopProgress, ProgressCallback};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of converting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// The assembled document.
    pub markdown: String,
    /// Where the assembled document was written inside the workspace.
    pub document_path: PathBuf,
    pub stats: ConversionStats,
}

/// How each page of a conversion was served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionStats {
    pub total_pages: usize,
    /// Pages that needed both model calls.
    pub computed_pages: usize,
    /// Pages whose transcription came from the cache.
    pub transcription_cached: usize,
    /// Pages whose final Markdown came from the cache.
    pub markdown_cached: usize,
}

impl ConversionStats {
    fn record(&mut self, hit: CacheHit) {
        match hit {
            CacheHit::None => self.computed_pages += 1,
            CacheHit::Transcription => self.transcription_cached += 1,
            CacheHit::Markdown => self.markdown_cached += 1,
        }
    }
}

/// Converts the PDF in a workspace into Markdown.
#[derive(Clone)]
pub struct DocumentConverter {
    extractor: Arc<dyn PageExtractor>,
    model: Arc<dyn GenerativeModel>,
    vision_model: String,
    text_model: String,
    progress: ProgressCallback,
}

impl DocumentConverter {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        model: Arc<dyn GenerativeModel>,
        vision_model: impl Into<String>,
        text_model: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            model,
            vision_model: vision_model.into(),
            text_model: text_model.into(),
            progress: Arc::new(NoopProgress),
        }
    }

    /// pdfium extraction and the configured model backend.
    pub fn from_config(config: &WorkerConfig) -> Result<Self, ModelError> {
        Ok(Self::new(
            Arc::new(PdfiumExtractor::new(&config.render)),
            model::from_config(&config.model)?,
            config.model.vision_model.clone(),
            config.model.text_model.clone(),
        ))
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    /// Convert the workspace's input, caching stages under `output/text/`.
    pub async fn convert(&self, workspace: &Workspace) -> Result<Conversion, JobError> {
        let cache = FsCacheStore::new(workspace.text_dir());
        self.convert_with_cache(workspace, &cache).await
    }

    /// Same as [`convert`](Self::convert) with a caller-supplied cache.
    pub async fn convert_with_cache(
        &self,
        workspace: &Workspace,
        cache: &dyn CacheStore,
    ) -> Result<Conversion, JobError> {
        let start = Instant::now();
        let input = workspace.input_path();
        let stem = workspace.input_stem();

        // ── Extract ──────────────────────────────────────────────────────
        let (texts, images) = self.extract(input, workspace.images_dir()).await?;
        let total_pages = images.len();
        info!("Document has {} pages", total_pages);
        self.progress.on_job_start(&stem, total_pages);

        // ── Per-page loop ────────────────────────────────────────────────
        let ctx = StageContext {
            model: self.model.as_ref(),
            cache,
            vision_model: &self.vision_model,
            text_model: &self.text_model,
            stem: &stem,
        };

        let mut pages = Vec::with_capacity(total_pages);
        let mut stats = ConversionStats {
            total_pages,
            ..Default::default()
        };

        for image in &images {
            let parsed_text = match texts.get(&image.page) {
                Some(text) => text.as_str(),
                None => {
                    warn!(page = image.page, "No parsed text for page, using empty text");
                    ""
                }
            };
            let input = PageInput {
                page: image.page,
                parsed_text,
                image_path: &image.path,
            };

            self.progress.on_page_start(image.page, total_pages);
            match process_page(&ctx, &input).await {
                Ok((markdown, hit)) => {
                    debug!(page = image.page, "Page done ({})", hit);
                    stats.record(hit);
                    self.progress
                        .on_page_complete(image.page, total_pages, markdown.len(), hit);
                    pages.push(markdown);
                }
                Err(e) => {
                    self.progress
                        .on_page_error(image.page, total_pages, &e.to_string());
                    return Err(e);
                }
            }
        }

        // ── Assemble ─────────────────────────────────────────────────────
        let markdown = assemble::assemble(&pages);
        let document_path = workspace.document_path();
        assemble::write_document(&document_path, &markdown).await?;

        info!(
            "Converted {} pages ({} computed, {} transcription cached, {} cached) in {}ms",
            total_pages,
            stats.computed_pages,
            stats.transcription_cached,
            stats.markdown_cached,
            start.elapsed().as_millis()
        );
        self.progress.on_job_complete(&stem, total_pages);

        Ok(Conversion {
            markdown,
            document_path,
            stats,
        })
    }

    async fn extract(
        &self,
        input: &Path,
        images_dir: &Path,
    ) -> Result<(BTreeMap<usize, PageText>, Vec<PageImage>), JobError> {
        let fail = |source| JobError::ExtractionFailure {
            path: input.to_path_buf(),
            source,
        };

        check_pdf_magic(input).await.map_err(fail)?;
        let texts = self.extractor.extract_text(input).await.map_err(fail)?;
        let mut images = self
            .extractor
            .extract_images(input, images_dir)
            .await
            .map_err(fail)?;

        images.sort_by_key(|i| i.page);
        for (idx, image) in images.iter().enumerate() {
            if image.page != idx + 1 {
                return Err(fail(ExtractError::NonContiguousPages {
                    expected: idx + 1,
                    found: image.page,
                }));
            }
        }
        Ok((texts, images))
    }

    /// Convert a local PDF to a Markdown file.
    ///
    /// The PDF is copied into a workspace named after its file stem under
    /// `workspace.root`, so re-running after a failure resumes from the
    /// caches. The output is written atomically (temp file + rename).
    pub async fn convert_file(
        &self,
        pdf: &Path,
        output: &Path,
        workspace: &WorkspaceConfig,
    ) -> Result<Conversion, JobError> {
        let file_name = pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.pdf".to_string());
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());

        let ws = Workspace::prepare(&workspace.root, &sanitize_job_id(&stem), &file_name).await?;
        tokio::fs::copy(pdf, ws.input_path())
            .await
            .map_err(|source| JobError::Workspace {
                stage: JobStage::Download,
                path: pdf.to_path_buf(),
                source,
            })?;

        let result = self.convert(&ws).await;
        if let Ok(ref conversion) = result {
            write_atomic(output, &conversion.markdown).await?;
            info!("Wrote {}", output.display());
        }
        if workspace.cleanup.should_remove(result.is_ok()) {
            ws.remove().await;
        }
        result
    }
}

/// Final Markdown for one page, and which cache served it.
async fn process_page(
    ctx: &StageContext<'_>,
    input: &PageInput<'_>,
) -> Result<(String, CacheHit), JobError> {
    let page = input.page;

    if let Some(markdown) = reconcile::cached_markdown(ctx, page)
        .await
        .map_err(|source| JobError::PageReconciliationFailure { page, source })?
    {
        return Ok((markdown, CacheHit::Markdown));
    }

    let transcription = transcribe::transcribe(ctx, input)
        .await
        .map_err(|source| JobError::PageTranscriptionFailure { page, source })?;

    let markdown = reconcile::reconcile(ctx, page, &transcription.text, input.parsed_text)
        .await
        .map_err(|source| JobError::PageReconciliationFailure { page, source })?;

    let hit = if transcription.cached {
        CacheHit::Transcription
    } else {
        CacheHit::None
    };
    Ok((markdown, hit))
}

/// Write via a temp file in the target directory, then rename over `path`.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), JobError> {
    let path = path.to_path_buf();
    let contents = contents.to_string();
    let err_path = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| JobError::Internal {
        stage: JobStage::Assemble,
        detail: format!("write task panicked: {e}"),
    })?
    .map_err(|source| JobError::Workspace {
        stage: JobStage::Assemble,
        path: err_path,
        source,
    })
}
