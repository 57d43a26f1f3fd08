//! OpenAI-compatible `/embeddings` backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::secret::Secret;
use crate::traits::embedder::Embedder;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiEmbedder {
    http_client: reqwest::Client,
    api_key: Secret,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    /// Vectors in input order; the API does not promise `data` is sorted.
    fn into_vectors(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

impl OpenAiEmbedder {
    pub fn new(
        http_client: reqwest::Client,
        api_key: Secret,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            http_client,
            api_key,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
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
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "embedding request failed");
                EmbeddingError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI embedding error");
            return Err(EmbeddingError::Backend(format!(
                "OpenAI returned {status}: {error_text}"
            )));
        }

        let body: EmbeddingResponse = response.json().await?;
        debug!(inputs = texts.len(), returned = body.data.len(), "OpenAI embeddings received");
        Ok(body.into_vectors())
    }
}
