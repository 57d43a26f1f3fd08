//! Crawl engine contract.
//!
//! Fetching, HTML parsing and link following live behind this trait; the
//! pipeline only consumes what the engine yields.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;

use crate::error::CrawlResult;
use crate::types::page::RawPage;
use crate::types::website::{CrawlType, HttpAuth};

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: String,
    pub crawl_type: CrawlType,
    pub http_auth: Option<HttpAuth>,
}

/// What a crawl produced.
///
/// `pages` is lazy and can only be consumed once. An `Err` item aborts the
/// attempt. `files` are documents the engine downloaded to local disk.
pub struct CrawlOutput {
    pub pages: BoxStream<'static, CrawlResult<RawPage>>,
    pub files: Vec<PathBuf>,
}

impl CrawlOutput {
    pub fn new(pages: BoxStream<'static, CrawlResult<RawPage>>) -> Self {
        Self {
            pages,
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files = files;
        self
    }
}

/// Produces pages for a crawl target.
#[async_trait]
pub trait CrawlEngine: Send + Sync {
    async fn crawl(&self, request: &CrawlRequest) -> CrawlResult<CrawlOutput>;
}
