//! Typed errors for the ingestion library.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Per-page problems are
//! not errors: they are recorded as [`PageFailure`](crate::types::page::PageFailure)
//! values and never abort an attempt.

use thiserror::Error;

/// Errors that abort a crawl attempt or a store operation.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Crawl engine failed
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Tenant has no embedding model configured
    #[error("no embedding model configured for tenant {tenant_id}")]
    NoEmbeddingModel { tenant_id: String },

    /// Embedding provider tag is unknown or lacks credentials
    #[error("embedding provider unavailable: {provider}")]
    MissingProvider { provider: String },

    /// Crawl engine produced nothing for the target
    #[error("crawl produced no pages for {url}")]
    NoPages { url: String },

    /// Record not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl IngestError {
    /// Wrap any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Storage(err.into())
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// Errors raised by a crawl engine.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Target refused our credentials
    #[error("authentication rejected by {url}")]
    Unauthorized { url: String },

    /// Connection timeout
    #[error("timeout crawling: {url}")]
    Timeout { url: String },
}

/// Errors raised by an embedding backend.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Call exceeded the caller's deadline
    #[error("embedding call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Backend returned an error or was unreachable
    #[error("embedding backend error: {0}")]
    Backend(String),

    /// Backend returned a different number of vectors than inputs
    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// Vector length disagrees with the configured model
    #[error("expected {expected}-dimensional embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for crawl engine operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for embedding backend calls.
pub type EmbeddingResult<T> = std::result::Result<T, EmbeddingError>;
