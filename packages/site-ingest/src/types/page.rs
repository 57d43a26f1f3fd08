//! Pages as they move through the pipeline, and per-page failures.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A page as produced by the crawl engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
}

impl RawPage {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            content: content.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// SHA-256 of the raw page content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        Self(Sha256::digest(content.as_bytes()).into())
    }

    /// Rebuild from a stored digest; `None` unless exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOrigin {
    /// Chunks were embedded during this attempt
    Embedded,
    /// Content was unchanged; stored chunks and vectors were carried over
    Reused,
}

/// Phase 1 output, consumed once by the persister.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPage {
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: ContentHash,
    pub chunks: Vec<String>,
    /// One vector per chunk, same order
    pub embeddings: Vec<Vec<f32>>,
    pub origin: PageOrigin,
}

/// What is stored for a `(website_id, url)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub url: String,
    pub title: Option<String>,
    pub content_hash: ContentHash,
    pub embedding_model: String,
    pub chunks: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

impl StoredDocument {
    pub fn from_prepared(page: &PreparedPage, embedding_model: &str) -> Self {
        Self {
            url: page.url.clone(),
            title: page.title.clone(),
            content_hash: page.content_hash,
            embedding_model: embedding_model.to_string(),
            chunks: page.chunks.clone(),
            embeddings: page.embeddings.clone(),
        }
    }
}

/// The cheap part of a stored document, used for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFingerprint {
    pub content_hash: ContentHash,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// No extractable text
    EmptyContent,
    /// Text existed but splitting left nothing worth embedding
    NoChunks,
    EmbeddingTimeout,
    EmbeddingError,
    /// The page's write was rolled back
    DbError,
    NoEmbeddingModel,
    MissingProvider,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::EmptyContent => "EMPTY_CONTENT",
            FailureReason::NoChunks => "NO_CHUNKS",
            FailureReason::EmbeddingTimeout => "EMBEDDING_TIMEOUT",
            FailureReason::EmbeddingError => "EMBEDDING_ERROR",
            FailureReason::DbError => "DB_ERROR",
            FailureReason::NoEmbeddingModel => "NO_EMBEDDING_MODEL",
            FailureReason::MissingProvider => "MISSING_PROVIDER",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page that could not be prepared or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFailure {
    pub url: String,
    pub reason: FailureReason,
    pub detail: Option<String>,
}

impl PageFailure {
    pub fn new(url: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            url: url.into(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Per-reason counts plus the individual failures, stored on the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBreakdown {
    pub counts: BTreeMap<FailureReason, usize>,
    pub pages: Vec<PageFailure>,
}

impl FailureBreakdown {
    pub fn from_failures(failures: &[PageFailure]) -> Self {
        let mut breakdown = Self::default();
        for failure in failures {
            breakdown.push(failure.clone());
        }
        breakdown
    }

    pub fn push(&mut self, failure: PageFailure) {
        *self.counts.entry(failure.reason).or_default() += 1;
        self.pages.push(failure);
    }

    pub fn count(&self, reason: FailureReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
