//! Shared fixtures for the integration tests: a scripted extractor and
//! model, and a pipeline wired to in-memory storage.

#![allow(dead_code)]

use async_trait::async_trait;
use pdf2md_worker::pipeline::extract::image_file_name;
use bytes::Bytes;
use pdf2md_worker::{
    CleanupPolicy, DocumentConverter, ExtractError, GenerateRequest, GenerativeModel,
    MemoryStorage, ModelError, ObjectStorage, PageExtractor, PageImage, PageText, Pipeline,
    StorageError, WorkerConfig,
};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n% fake body\n";

/// Extractor returning fixed per-page text. Writes a placeholder image per
/// page so the transcription stage has something to encode.
pub struct FakeExtractor {
    pub pages: Vec<String>,
}

impl FakeExtractor {
    pub fn new<S: Into<String>>(pages: impl IntoIterator<Item = S>) -> Arc<Self> {
        Arc::new(Self {
            pages: pages.into_iter().map(Into::into).collect(),
        })
    }
}

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract_text(&self, _pdf: &Path) -> Result<BTreeMap<usize, PageText>, ExtractError> {
        Ok(self
            .pages
            .iter()
            .enumerate()
            .map(|(i, t)| (i + 1, PageText::Parsed(t.clone())))
            .collect())
    }

    async fn extract_images(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PageImage>, ExtractError> {
        let stem = pdf.file_stem().unwrap().to_string_lossy().into_owned();
        let mut images = Vec::new();
        for page in 1..=self.pages.len() {
            let path = out_dir.join(image_file_name(&stem, page));
            tokio::fs::write(&path, format!("png {page}")).await?;
            images.push(PageImage { page, path });
        }
        Ok(images)
    }
}

/// Page number from a prompt starting with `Page N.`.
pub fn prompt_page(request: &GenerateRequest) -> usize {
    request
        .prompt
        .strip_prefix("Page ")
        .and_then(|rest| rest.split('.').next())
        .and_then(|n| n.parse().ok())
        .expect("prompt starts with the page number")
}

type Reply = Box<dyn Fn(usize, &GenerateRequest) -> String + Send + Sync>;

/// Model answering transcriptions with `seen {page}` and reconciliations
/// through a reply function. Counts calls and the peak number in flight.
pub struct ScriptedModel {
    reconcile: Reply,
    pub transcriptions: AtomicUsize,
    pub reconciliations: AtomicUsize,
    pub requests: Mutex<Vec<GenerateRequest>>,
    fail_reconcile_page: Mutex<Option<usize>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl ScriptedModel {
    /// Reconciliation answers `# Page {N}` followed by the transcription.
    pub fn new() -> Arc<Self> {
        Self::with_reply(|page, _| format!("# Page {page}\n\nseen {page}"))
    }

    pub fn with_reply(reply: impl Fn(usize, &GenerateRequest) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::build(Box::new(reply), None))
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(
            Box::new(|page, _| format!("page {page}")),
            Some(delay),
        ))
    }

    fn build(reconcile: Reply, delay: Option<Duration>) -> Self {
        Self {
            reconcile,
            transcriptions: AtomicUsize::new(0),
            reconciliations: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail_reconcile_page: Mutex::new(None),
            delay,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make reconciliation of `page` fail until cleared with `None`.
    pub fn fail_reconcile_on(&self, page: Option<usize>) {
        *self.fail_reconcile_page.lock().unwrap() = page;
    }

    pub fn calls(&self) -> usize {
        self.transcriptions.load(Ordering::SeqCst) + self.reconciliations.load(Ordering::SeqCst)
    }

    pub fn transcription_calls(&self) -> usize {
        self.transcriptions.load(Ordering::SeqCst)
    }

    pub fn reconciliation_calls(&self) -> usize {
        self.reconciliations.load(Ordering::SeqCst)
    }

    /// Pages of the reconciliation requests, in call order.
    pub fn reconciled_pages(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.images.is_empty())
            .map(prompt_page)
            .collect()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.requests.lock().unwrap().push(request.clone());
        let page = prompt_page(request);

        if !request.images.is_empty() {
            self.transcriptions.fetch_add(1, Ordering::SeqCst);
            return Ok(format!("seen {page}"));
        }

        self.reconciliations.fetch_add(1, Ordering::SeqCst);
        if *self.fail_reconcile_page.lock().unwrap() == Some(page) {
            return Err(ModelError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok((self.reconcile)(page, request))
    }
}

/// In-memory storage that counts the calls made through the trait.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryStorage,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
}

impl CountingStorage {
    pub fn calls(&self) -> (usize, usize) {
        (self.gets.load(Ordering::SeqCst), self.puts.load(Ordering::SeqCst))
    }
}

impl Deref for CountingStorage {
    type Target = MemoryStorage;

    fn deref(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl ObjectStorage for CountingStorage {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(bucket, key, body, content_type).await
    }
}

/// A pipeline over in-memory storage, with `report.pdf` in bucket `inbox`.
pub struct Harness {
    pub storage: Arc<CountingStorage>,
    pub model: Arc<ScriptedModel>,
    pub pipeline: Arc<Pipeline>,
    pub workspace_root: tempfile::TempDir,
}

impl Harness {
    pub fn new(pages: &[&str], model: Arc<ScriptedModel>, cleanup: CleanupPolicy) -> Self {
        Self::with_options(pages, model, cleanup, false)
    }

    pub fn with_options(
        pages: &[&str],
        model: Arc<ScriptedModel>,
        cleanup: CleanupPolicy,
        publish_artifacts: bool,
    ) -> Self {
        init_tracing();
        let workspace_root = tempfile::tempdir().unwrap();
        let storage = Arc::new(CountingStorage::default());
        storage.insert("inbox", "report.pdf", PDF_BYTES, "application/pdf");

        let config = WorkerConfig::builder()
            .workspace_root(workspace_root.path())
            .cleanup(cleanup)
            .publish_artifacts(publish_artifacts)
            .build()
            .unwrap();
        let converter = DocumentConverter::new(
            FakeExtractor::new(pages.iter().copied()),
            model.clone(),
            "vision",
            "text",
        );
        let pipeline = Arc::new(Pipeline::new(config, storage.clone(), converter));

        Self {
            storage,
            model,
            pipeline,
            workspace_root,
        }
    }

    /// Directory of the job `inbox/report.pdf`.
    pub fn job_dir(&self) -> std::path::PathBuf {
        self.workspace_root.path().join("inbox+report.pdf+results")
    }
}

pub fn descriptor(json: &str) -> pdf2md_worker::JobDescriptor {
    serde_json::from_str(json).unwrap()
}

pub fn report_job() -> pdf2md_worker::JobDescriptor {
    descriptor(r#"{"sourceBucket":"inbox","sourceKey":"report.pdf","outputBucket":"results"}"#)
}
