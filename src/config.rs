//! Configuration types for the conversion worker.
//!
//! Everything the worker needs to know is gathered into one
//! [`WorkerConfig`], built once at process start via its
//! [`WorkerConfigBuilder`] and handed by reference to the pipeline and its
//! collaborators. Library code never reads the environment; the binary maps
//! flags and environment variables onto the builder.
//!
//! # Design choice: builder over constructor
//! The config groups four collaborators (model, storage, workspace, render)
//! plus pool sizing. The builder lets callers set only what they care about
//! and rely on documented defaults for the rest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default model used for both transcription and reconciliation.
pub const DEFAULT_MODEL: &str = "qwen2.5vl:latest";

/// Default base URL of the generative-model service.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Top-level configuration for the worker process.
///
/// # Example
/// ```rust
/// use pdf2md_worker::{CleanupPolicy, WorkerConfig};
///
/// let config = WorkerConfig::builder()
///     .concurrency(4)
///     .vision_model("llava:13b")
///     .cleanup(CleanupPolicy::Keep)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Generative-model service settings.
    pub model: ModelConfig,

    /// Object-storage settings.
    pub storage: StorageConfig,

    /// Per-job working directory settings.
    pub workspace: WorkspaceConfig,

    /// Page rasterisation settings.
    pub render: RenderConfig,

    /// Maximum number of jobs processed at once (K). Default: 2.
    ///
    /// Pages inside one job are always processed one at a time, so this is
    /// also the upper bound on in-flight model requests.
    pub concurrency: usize,

    /// Upload every file under the workspace `output/` tree after the final
    /// document. Default: false.
    pub publish_artifacts: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            storage: StorageConfig::default(),
            workspace: WorkspaceConfig::default(),
            render: RenderConfig::default(),
            concurrency: 2,
            publish_artifacts: false,
        }
    }
}

impl WorkerConfig {
    /// Create a new builder for `WorkerConfig`.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }
}

// ── Model ────────────────────────────────────────────────────────────────

/// Which generative-model backend serves requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelBackend {
    /// `POST {base_url}/api/generate` (Ollama-compatible).
    Generate { base_url: String },
    /// A hosted provider created through `edgequake-llm`
    /// (e.g. "openai", "anthropic", "gemini").
    Provider { name: String },
}

impl Default for ModelBackend {
    fn default() -> Self {
        ModelBackend::Generate {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Settings for the generative-model service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backend: ModelBackend,

    /// Model that reads rendered page images. Default: [`DEFAULT_MODEL`].
    pub vision_model: String,

    /// Model that merges transcription and parsed text. Default: [`DEFAULT_MODEL`].
    pub text_model: String,

    /// Sampling temperature forwarded to provider backends. Default: 0.1.
    pub temperature: f32,

    /// Maximum generated tokens forwarded to provider backends. Default: 4096.
    pub max_tokens: usize,

    /// Per-request timeout in seconds. Default: none.
    ///
    /// Without a timeout a hung model call stalls its job (and only its job)
    /// until the queue redelivers it.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::default(),
            vision_model: DEFAULT_MODEL.to_string(),
            text_model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            request_timeout_secs: None,
        }
    }
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Settings for the object-storage collaborator.
#[derive(Clone)]
pub struct StorageConfig {
    /// Serve buckets from sub-directories of this local directory instead of
    /// S3. Takes precedence over the S3 settings.
    pub local_root: Option<PathBuf>,

    /// S3-compatible endpoint URL; `None` means AWS itself.
    pub endpoint: Option<String>,

    /// Region. Default: "eu-north-1".
    pub region: String,

    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,

    /// Allow plain-HTTP endpoints (MinIO in development). Default: false.
    pub allow_http: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: None,
            endpoint: None,
            region: "eu-north-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("local_root", &self.local_root)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

// ── Workspace ────────────────────────────────────────────────────────────

/// What happens to a job's working directory when the job ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CleanupPolicy {
    /// Never remove it; every cache survives.
    Keep,
    /// Remove it after a successful publish; failed jobs keep their caches
    /// so a redelivered job resumes where it stopped. (default)
    #[default]
    RemoveOnSuccess,
    /// Remove it at the end of every job, successful or not.
    Always,
}

impl CleanupPolicy {
    /// Whether the workspace should be removed given the job outcome.
    pub fn should_remove(self, succeeded: bool) -> bool {
        match self {
            CleanupPolicy::Keep => false,
            CleanupPolicy::RemoveOnSuccess => succeeded,
            CleanupPolicy::Always => true,
        }
    }
}

/// Settings for per-job working directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Parent directory of every job workspace.
    /// Default: `{tmp}/pdf2md-worker`.
    pub root: PathBuf,

    pub cleanup: CleanupPolicy,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("pdf2md-worker"),
            cleanup: CleanupPolicy::default(),
        }
    }
}

// ── Render ───────────────────────────────────────────────────────────────

/// Settings for page rasterisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps either dimension, scaling the other proportionally, so an A0
    /// poster cannot exhaust memory or exceed model upload limits.
    pub max_rendered_pixels: u32,

    /// Directory containing the platform pdfium library.
    /// `None` binds the system library.
    pub pdfium_lib_dir: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            pdfium_lib_dir: None,
        }
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model_backend(mut self, backend: ModelBackend) -> Self {
        self.config.model.backend = backend;
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.model.vision_model = model.into();
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.model.text_model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.model.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.model.max_tokens = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.model.request_timeout_secs = secs;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace.root = root.into();
        self
    }

    pub fn cleanup(mut self, policy: CleanupPolicy) -> Self {
        self.config.workspace.cleanup = policy;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.render.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.render.pdfium_lib_dir = Some(dir.into());
        self
    }

    pub fn publish_artifacts(mut self, v: bool) -> Self {
        self.config.publish_artifacts = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, ConfigError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ConfigError("Concurrency must be ≥ 1".into()));
        }
        if c.model.vision_model.trim().is_empty() || c.model.text_model.trim().is_empty() {
            return Err(ConfigError("Model names must not be empty".into()));
        }
        match &c.model.backend {
            ModelBackend::Generate { base_url }
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) =>
            {
                return Err(ConfigError(format!(
                    "Model base URL must be http(s), got '{base_url}'"
                )));
            }
            ModelBackend::Provider { name } if name.trim().is_empty() => {
                return Err(ConfigError("Provider name must not be empty".into()));
            }
            _ => {}
        }
        if c.workspace.root.as_os_str().is_empty() {
            return Err(ConfigError("Workspace root must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// Builder validation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);
