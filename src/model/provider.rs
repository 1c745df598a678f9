//! [`GenerativeModel`] over an `edgequake-llm` provider.
//!
//! Lets the worker talk to any hosted vision model the provider factory
//! knows about (`openai`, `anthropic`, `gemini`, `ollama`, ...). API keys
//! are read by the factory from the usual environment variables.

use super::{GenerateRequest, GenerativeModel};
use crate::error::ModelError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A named provider; one client per model, created on first use.
///
/// Transcription and reconciliation may use different models, hence the
/// per-model cache.
pub struct ProviderModel {
    name: String,
    options: CompletionOptions,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderModel {
    pub fn new(name: &str, temperature: f32, max_tokens: usize) -> Self {
        Self {
            name: name.to_string(),
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn error(&self, detail: impl ToString) -> ModelError {
        ModelError::Provider {
            provider: self.name.clone(),
            detail: detail.to_string(),
        }
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ModelError> {
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| self.error("provider cache lock poisoned"))?;
        if let Some(p) = providers.get(model) {
            return Ok(Arc::clone(p));
        }
        let provider =
            ProviderFactory::create_llm_provider(&self.name, model).map_err(|e| self.error(e))?;
        providers.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

/// System turn, then one user turn carrying the prompt and any page images.
fn build_messages(request: &GenerateRequest) -> Vec<ChatMessage> {
    let images: Vec<ImageData> = request
        .images
        .iter()
        .map(|b64| ImageData::new(b64.clone(), "image/png"))
        .collect();
    let user = ChatMessage::user_with_images(&request.prompt, images);
    vec![ChatMessage::system(&request.system), user]
}

#[async_trait]
impl GenerativeModel for ProviderModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let provider = self.provider_for(&request.model)?;
        let messages = build_messages(request);
        let response = provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| self.error(e))?;
        debug!(
            provider = %self.name,
            model = %request.model,
            "{} input tokens, {} output tokens",
            response.prompt_tokens,
            response.completion_tokens
        );
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_constructor() {
        let m = ProviderModel::new("openai", 0.2, 1024);
        assert_eq!(m.options.temperature, Some(0.2));
        assert_eq!(m.options.max_tokens, Some(1024));
    }

    #[test]
    fn messages_are_system_then_user() {
        let request = GenerateRequest {
            model: "m".into(),
            system: "sys".into(),
            prompt: "text".into(),
            images: vec!["aGk=".into()],
        };
        let messages = build_messages(&request);
        assert_eq!(messages.len(), 2);
    }
}
