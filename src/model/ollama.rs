//! Client for the `/api/generate` endpoint.
//!
//! Contract: `POST {base_url}/api/generate` with
//! `{ model, system, prompt, stream: false, images?: [base64] }`. A 2xx
//! response carries a JSON body with a `response` string; anything else is a
//! hard failure whose body is kept verbatim as the diagnostic.
//!
//! No retries happen here. A failed call fails the page, the page fails the
//! job, and the queue decides whether to redeliver.

use super::{GenerateRequest, GenerativeModel};
use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP client for an Ollama-compatible generate endpoint.
#[derive(Debug, Clone)]
pub struct GenerateClient {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl GenerateClient {
    /// Create a client for `base_url` (trailing slashes are ignored).
    pub fn new(base_url: &str, timeout_secs: Option<u64>) -> Result<Self, ModelError> {
        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let mut builder = Client::builder();
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|source| ModelError::Connection {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url })
    }

    /// The full endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GenerativeModel for GenerateClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let body = GenerateBody {
            model: &request.model,
            system: &request.system,
            prompt: &request.prompt,
            stream: false,
            images: (!request.images.is_empty()).then_some(request.images.as_slice()),
        };

        debug!(
            model = %request.model,
            images = request.images.len(),
            prompt_len = request.prompt.len(),
            "POST {}",
            self.url
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ModelError::Connection {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => format!("<unreadable response body: {e}>"),
            };
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let parsed: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::InvalidResponse(format!("{e}: {text}")))?;
        Ok(parsed.response)
    }
}
