//! Generative-model backends.
//!
//! Both per-page stages talk to the model service through the
//! [`GenerativeModel`] trait: one request in, one complete (non-streamed)
//! text response out. Keeping the seam this narrow means the stages never
//! see HTTP, and tests can substitute a scripted model.
//!
//! * [`ollama::GenerateClient`]: `POST {base_url}/api/generate`
//! * [`provider::ProviderModel`]: any `edgequake-llm` provider

pub mod ollama;
pub mod provider;

use crate::config::{ModelBackend, ModelConfig};
use crate::error::ModelError;
use async_trait::async_trait;
use std::sync::Arc;

pub use ollama::GenerateClient;
pub use provider::ProviderModel;

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    /// Fixed instruction for the task.
    pub system: String,
    /// Per-page content.
    pub prompt: String,
    /// Base64-encoded images; empty for text-only requests.
    pub images: Vec<String>,
}

/// A service that answers a [`GenerateRequest`] with text.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError>;
}

/// Build the backend selected by `config`.
pub fn from_config(config: &ModelConfig) -> Result<Arc<dyn GenerativeModel>, ModelError> {
    match &config.backend {
        ModelBackend::Generate { base_url } => Ok(Arc::new(GenerateClient::new(
            base_url,
            config.request_timeout_secs,
        )?)),
        ModelBackend::Provider { name } => Ok(Arc::new(ProviderModel::new(
            name,
            config.temperature,
            config.max_tokens,
        ))),
    }
}
