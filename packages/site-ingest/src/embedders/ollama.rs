//! Ollama `/api/embed` backend for self-hosted models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::traits::embedder::Embedder;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaEmbedder {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    pub fn new(http_client: reqwest::Client, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            http_client,
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: model.into(),
            dimensions,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let response = self
            .http_client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Ollama embedding error");
            return Err(EmbeddingError::Backend(format!(
                "Ollama returned {status}: {error_text}"
            )));
        }

        let body: EmbedResponse = response.json().await?;
        Ok(body.embeddings)
    }
}
