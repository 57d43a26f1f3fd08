//! Testing utilities including mock implementations.
//!
//! These let applications exercise the scheduler and the ingestion
//! pipeline without a network, an embedding provider, or a database.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{CrawlError, CrawlResult, EmbeddingError, EmbeddingResult, IngestError, Result};
use crate::traits::crawler::{CrawlEngine, CrawlOutput, CrawlRequest};
use crate::traits::embedder::{Embedder, EmbedderFactory};
use crate::types::context::EmbeddingModelSpec;
use crate::types::page::RawPage;

/// Provider tag served by [`MockEmbedderFactory`].
pub const MOCK_PROVIDER: &str = "mock";

/// Model name reported by [`MockEmbedder`].
pub const MOCK_MODEL: &str = "mock-embed";

/// A deterministic embedder.
///
/// Vectors are derived from a SHA-256 of the input, so equal text always
/// embeds identically. Calls can be made to fail, stall, or return a short
/// result, and every call's batch size is recorded.
pub struct MockEmbedder {
    model: String,
    dimensions: usize,
    /// 1-based call numbers that return a backend error
    fail_calls: HashSet<usize>,
    delay: Option<Duration>,
    drop_last_vector: bool,
    calls: RwLock<Vec<usize>>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model: MOCK_MODEL.to_string(),
            dimensions,
            fail_calls: HashSet::new(),
            delay: None,
            drop_last_vector: false,
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Fail the given calls, counting from 1.
    pub fn fail_calls(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.fail_calls.extend(calls);
        self
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return one vector fewer than requested.
    pub fn drop_last_vector(mut self) -> Self {
        self.drop_last_vector = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Input count of every call so far, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.read().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    /// The vector this embedder returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(text.as_bytes());
        (0..self.dimensions)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let call = {
            let mut calls = self.calls.write().unwrap();
            calls.push(texts.len());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_calls.contains(&call) {
            return Err(EmbeddingError::Backend(format!("injected failure on call {call}")));
        }

        let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| self.vector_for(t)).collect();
        if self.drop_last_vector {
            vectors.pop();
        }
        Ok(vectors)
    }
}

/// Hands out one shared [`MockEmbedder`] for the `mock` provider tag and
/// refuses every other provider.
pub struct MockEmbedderFactory {
    embedder: Arc<MockEmbedder>,
}

impl MockEmbedderFactory {
    pub fn new(embedder: Arc<MockEmbedder>) -> Self {
        Self { embedder }
    }
}

impl EmbedderFactory for MockEmbedderFactory {
    fn build(&self, spec: &EmbeddingModelSpec) -> Result<Arc<dyn Embedder>> {
        if spec.provider != MOCK_PROVIDER {
            return Err(IngestError::MissingProvider {
                provider: spec.provider.clone(),
            });
        }
        Ok(self.embedder.clone())
    }
}

#[derive(Clone, Default)]
struct MockSite {
    pages: Vec<RawPage>,
    files: Vec<PathBuf>,
    refuse: bool,
    break_stream: bool,
}

/// A scripted crawl engine.
///
/// Unknown URLs crawl successfully with zero pages. Sites can be edited
/// between attempts to simulate content changes.
#[derive(Default)]
pub struct MockCrawlEngine {
    sites: RwLock<HashMap<String, MockSite>>,
    delay: Option<Duration>,
    requests: RwLock<Vec<CrawlRequest>>,
}

impl MockCrawlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every crawl open for `delay` before yielding output.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_pages(self, url: impl Into<String>, pages: Vec<RawPage>) -> Self {
        self.set_pages(url, pages);
        self
    }

    /// Replace the pages served for `url`.
    pub fn set_pages(&self, url: impl Into<String>, pages: Vec<RawPage>) {
        self.sites.write().unwrap().entry(url.into()).or_default().pages = pages;
    }

    pub fn with_files(self, url: impl Into<String>, files: Vec<PathBuf>) -> Self {
        self.sites.write().unwrap().entry(url.into()).or_default().files = files;
        self
    }

    /// Make `crawl` itself fail for `url`.
    pub fn refuse(self, url: impl Into<String>) -> Self {
        self.sites.write().unwrap().entry(url.into()).or_default().refuse = true;
        self
    }

    /// Yield an error after the scripted pages for `url`.
    pub fn break_stream(self, url: impl Into<String>) -> Self {
        self.sites.write().unwrap().entry(url.into()).or_default().break_stream = true;
        self
    }

    pub fn requests(&self) -> Vec<CrawlRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl CrawlEngine for MockCrawlEngine {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<CrawlOutput> {
        self.requests.write().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let site = self
            .sites
            .read()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_default();

        if site.refuse {
            return Err(CrawlError::Unauthorized {
                url: request.url.clone(),
            });
        }

        let mut items: Vec<CrawlResult<RawPage>> = site.pages.into_iter().map(Ok).collect();
        if site.break_stream {
            items.push(Err(CrawlError::Timeout {
                url: request.url.clone(),
            }));
        }

        Ok(CrawlOutput::new(stream::iter(items).boxed()).with_files(site.files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let embedder = MockEmbedder::new(4);
        let a = embedder.embed_batch(&["same", "other"]).await.unwrap();
        let b = embedder.embed_batch(&["same"]).await.unwrap();

        assert_eq!(a[0], b[0]);
        assert_ne!(a[0], a[1]);
        assert_eq!(embedder.batch_sizes(), vec![2, 1]);
    }

    #[test]
    fn factory_refuses_unknown_providers() {
        let factory = MockEmbedderFactory::new(Arc::new(MockEmbedder::new(4)));
        let spec = EmbeddingModelSpec::new("cohere", "embed-v3", 4);
        assert!(matches!(
            factory.build(&spec),
            Err(IngestError::MissingProvider { .. })
        ));
    }
}
