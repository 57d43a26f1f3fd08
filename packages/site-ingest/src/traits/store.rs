//! Storage traits for websites and indexed documents.
//!
//! - `WebsiteStore`: scheduling columns and per-tenant embedding models
//! - `DocumentStore`: read side used for change detection
//! - `PageSink` / `PageTransaction`: the transactional write side

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::id::{TenantId, WebsiteId};
use crate::policy::BreakerUpdate;
use crate::types::context::EmbeddingModelSpec;
use crate::types::page::{DocumentFingerprint, PreparedPage, StoredDocument};
use crate::types::website::Website;

#[async_trait]
pub trait WebsiteStore: Send + Sync {
    async fn find_website(&self, id: WebsiteId) -> Result<Option<Website>>;

    /// Websites due at `now`, excluding any with a queued or in-progress job.
    ///
    /// The active-job exclusion must be evaluated by the store itself, in
    /// the same read, so that two schedulers cannot both see a site as free.
    async fn due_websites(&self, now: DateTime<Utc>) -> Result<Vec<Website>>;

    async fn apply_breaker(&self, id: WebsiteId, update: &BreakerUpdate) -> Result<()>;

    async fn find_embedding_model(&self, tenant_id: TenantId) -> Result<Option<EmbeddingModelSpec>>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_fingerprint(&self, website_id: WebsiteId, url: &str) -> Result<Option<DocumentFingerprint>>;

    async fn load_document(&self, website_id: WebsiteId, url: &str) -> Result<Option<StoredDocument>>;
}

/// Opens short write transactions for prepared pages.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PageTransaction>>;
}

/// An open write transaction with savepoint support.
///
/// Dropping without `commit` discards all writes.
#[async_trait]
pub trait PageTransaction: Send {
    async fn savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    /// Delete whatever is stored for `(website_id, page.url)`, then insert `page`.
    async fn replace_page(
        &mut self,
        website_id: WebsiteId,
        embedding_model: &str,
        page: &PreparedPage,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
