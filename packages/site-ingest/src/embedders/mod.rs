//! Embedding providers and the registry that picks one per tenant.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

use std::str::FromStr;
use std::sync::Arc;

use crate::config::ProviderCredentials;
use crate::error::{IngestError, Result};
use crate::traits::embedder::{Embedder, EmbedderFactory};
use crate::types::context::EmbeddingModelSpec;

/// Provider tags this crate can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "ollama" => Ok(ProviderKind::Ollama),
            _ => Err(IngestError::MissingProvider {
                provider: s.to_string(),
            }),
        }
    }
}

/// Builds embedders from tenant model specs using process-wide credentials.
///
/// A spec's `api_base` wins over the configured base URL.
pub struct ProviderRegistry {
    http_client: reqwest::Client,
    credentials: ProviderCredentials,
}

impl ProviderRegistry {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            credentials,
        }
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }
}

impl EmbedderFactory for ProviderRegistry {
    fn build(&self, spec: &EmbeddingModelSpec) -> Result<Arc<dyn Embedder>> {
        match spec.provider.parse::<ProviderKind>()? {
            ProviderKind::OpenAi => {
                let api_key = self.credentials.openai_api_key.clone().ok_or_else(|| {
                    IngestError::MissingProvider {
                        provider: format!("{} (OPENAI_API_KEY not set)", spec.provider),
                    }
                })?;
                let mut embedder =
                    OpenAiEmbedder::new(self.http_client.clone(), api_key, &spec.model, spec.dimensions);
                if let Some(base) = spec.api_base.as_ref().or(self.credentials.openai_base_url.as_ref()) {
                    embedder = embedder.with_base_url(base.as_str());
                }
                Ok(Arc::new(embedder))
            }
            ProviderKind::Ollama => {
                let mut embedder = OllamaEmbedder::new(self.http_client.clone(), &spec.model, spec.dimensions);
                if let Some(base) = spec.api_base.as_ref().or(self.credentials.ollama_base_url.as_ref()) {
                    embedder = embedder.with_base_url(base.as_str());
                }
                Ok(Arc::new(embedder))
            }
        }
    }
}
