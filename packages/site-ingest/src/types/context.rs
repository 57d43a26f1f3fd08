//! Immutable per-attempt snapshots.
//!
//! Everything Phase 1 and Phase 2 need is copied out of the durable records
//! into these values before any network I/O starts. Nothing downstream
//! re-reads the website row or holds a storage handle across an await.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::id::{TenantId, WebsiteId};
use crate::traits::crawler::CrawlRequest;
use crate::types::website::{CrawlType, HttpAuth, Website};

/// Which embedding model a tenant's documents are indexed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelSpec {
    /// Provider tag, e.g. `openai` or `ollama`
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub api_base: Option<String>,
}

impl EmbeddingModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dimensions,
            api_base: None,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Estimated size of one stored vector.
    pub fn bytes_per_embedding(&self) -> usize {
        self.dimensions * std::mem::size_of::<f32>()
    }
}

/// Batch and timeout limits for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBudget {
    pub batch_size: usize,
    pub max_batch_content_bytes: usize,
    pub max_batch_embedding_bytes: usize,
    pub embedding_timeout: Duration,
    pub max_transaction_wall_time: Duration,
}

/// Snapshot handed to both ingestion phases.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub website_id: WebsiteId,
    pub tenant_id: TenantId,
    pub url: String,
    pub crawl_type: CrawlType,
    pub http_auth: Option<HttpAuth>,
    pub model: EmbeddingModelSpec,
    pub budget: BatchBudget,
}

impl CrawlContext {
    pub fn new(website: &Website, model: EmbeddingModelSpec, budget: BatchBudget) -> Self {
        Self {
            website_id: website.id,
            tenant_id: website.tenant_id,
            url: website.url.clone(),
            crawl_type: website.crawl_type,
            http_auth: website.http_auth.clone(),
            model,
            budget,
        }
    }

    pub fn crawl_request(&self) -> CrawlRequest {
        CrawlRequest {
            url: self.url.clone(),
            crawl_type: self.crawl_type,
            http_auth: self.http_auth.clone(),
        }
    }

    /// Where a successful attempt's documents can be found.
    pub fn result_location(&self) -> String {
        format!("website_documents/{}", self.website_id)
    }
}
