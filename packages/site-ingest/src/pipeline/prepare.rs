//! Phase 1: turn crawled pages into embedded, ready-to-write pages.
//!
//! All embedding traffic happens here, before any write transaction is
//! opened. Unchanged pages (same content hash and embedding model as the
//! stored copy) reuse their stored chunks and vectors with no embedding
//! call. Everything else is chunked and embedded in cap-bounded batches
//! that may span pages.
//!
//! A failed or timed-out batch is not retried on the spot: its chunks are
//! moved to the head of the next batch, once, as far as caps allow. Chunks
//! that fail twice, or find no room, fail their page.

use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{EmbeddingError, Result};
use crate::pipeline::batcher::{BatchLimits, BatchPlanner, PendingChunk};
use crate::pipeline::chunker::Chunker;
use crate::traits::crawler::CrawlOutput;
use crate::traits::embedder::Embedder;
use crate::traits::store::DocumentStore;
use crate::types::context::CrawlContext;
use crate::types::page::{
    ContentHash, FailureReason, PageFailure, PageOrigin, PreparedPage, RawPage, StoredDocument,
};

/// Result of Phase 1 for one attempt.
#[derive(Debug, Default)]
pub struct PrepareReport {
    pub pages: Vec<PreparedPage>,
    pub failures: Vec<PageFailure>,
    /// Pages and files the crawl produced, whether or not they survived
    pub pages_seen: usize,
    pub pages_embedded: usize,
    pub pages_reused: usize,
    pub embedding_calls: usize,
}

pub struct ContentPreparer {
    documents: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
}

/// A page whose chunks are in flight.
struct PageSlot {
    url: String,
    title: Option<String>,
    content: String,
    content_hash: ContentHash,
    chunks: Vec<String>,
    embeddings: Vec<Option<Vec<f32>>>,
    failed: bool,
}

struct PrepareRun {
    slots: Vec<PageSlot>,
    planner: BatchPlanner,
    report: PrepareReport,
}

impl PrepareRun {
    fn fail_slot(&mut self, page: usize, reason: FailureReason, detail: &str) {
        let slot = &mut self.slots[page];
        if slot.failed {
            return;
        }
        slot.failed = true;
        warn!(url = %slot.url, reason = %reason, detail, "page failed");
        self.report
            .failures
            .push(PageFailure::new(slot.url.clone(), reason).with_detail(detail));
    }
}

impl ContentPreparer {
    pub fn new(documents: Arc<dyn DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            documents,
            embedder,
            chunker: Chunker::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Consume the crawl output and prepare every page in it.
    ///
    /// Only an error yielded by the crawl stream aborts; every other
    /// problem becomes a [`PageFailure`].
    #[instrument(skip_all, fields(website_id = %ctx.website_id, model = %ctx.model.model))]
    pub async fn prepare(&self, ctx: &CrawlContext, output: CrawlOutput) -> Result<PrepareReport> {
        let CrawlOutput { mut pages, files } = output;
        let mut run = PrepareRun {
            slots: Vec::new(),
            planner: BatchPlanner::new(BatchLimits::new(&ctx.budget, &ctx.model)),
            report: PrepareReport::default(),
        };

        while let Some(page) = pages.next().await {
            self.admit(ctx, &mut run, page?).await;
        }

        for path in files {
            match read_file_page(&path).await {
                Ok(page) => self.admit(ctx, &mut run, page).await,
                Err(err) => {
                    let url = file_url(&path);
                    warn!(url = %url, error = %err, "downloaded file unreadable");
                    run.report.pages_seen += 1;
                    run.report.failures.push(
                        PageFailure::new(url, FailureReason::EmptyContent)
                            .with_detail(format!("unreadable file: {err}")),
                    );
                }
            }
        }

        // Retries seeded by a failed batch land back in the planner, so
        // keep draining until nothing is left.
        loop {
            let batch = run.planner.take();
            if batch.is_empty() {
                break;
            }
            self.embed(ctx, &mut run, batch).await;
        }

        let PrepareRun {
            slots, mut report, ..
        } = run;
        for slot in slots.into_iter().filter(|s| !s.failed) {
            let Some(embeddings) = slot.embeddings.into_iter().collect::<Option<Vec<_>>>() else {
                report.failures.push(
                    PageFailure::new(slot.url, FailureReason::EmbeddingError)
                        .with_detail("chunks left without vectors"),
                );
                continue;
            };
            report.pages_embedded += 1;
            report.pages.push(PreparedPage {
                url: slot.url,
                title: slot.title,
                content: slot.content,
                content_hash: slot.content_hash,
                chunks: slot.chunks,
                embeddings,
                origin: PageOrigin::Embedded,
            });
        }

        info!(
            seen = report.pages_seen,
            embedded = report.pages_embedded,
            reused = report.pages_reused,
            failed = report.failures.len(),
            embedding_calls = report.embedding_calls,
            "content prepared"
        );
        Ok(report)
    }

    async fn admit(&self, ctx: &CrawlContext, run: &mut PrepareRun, page: RawPage) {
        run.report.pages_seen += 1;

        if page.content.trim().is_empty() {
            debug!(url = %page.url, "empty page");
            run.report
                .failures
                .push(PageFailure::new(page.url, FailureReason::EmptyContent));
            return;
        }

        let content_hash = ContentHash::of(&page.content);
        if let Some(stored) = self.reusable(ctx, &page.url, content_hash).await {
            debug!(url = %page.url, "content unchanged, reusing stored embeddings");
            run.report.pages_reused += 1;
            run.report.pages.push(PreparedPage {
                url: page.url,
                title: page.title.or(stored.title),
                content: page.content,
                content_hash,
                chunks: stored.chunks,
                embeddings: stored.embeddings,
                origin: PageOrigin::Reused,
            });
            return;
        }

        let chunks = self.chunker.split(&page.content);
        if chunks.is_empty() {
            run.report
                .failures
                .push(PageFailure::new(page.url, FailureReason::NoChunks));
            return;
        }

        let slot = run.slots.len();
        run.slots.push(PageSlot {
            url: page.url,
            title: page.title,
            content: page.content,
            content_hash,
            embeddings: vec![None; chunks.len()],
            chunks: chunks.clone(),
            failed: false,
        });

        for (index, text) in chunks.into_iter().enumerate() {
            if run.slots[slot].failed {
                break;
            }
            let pending = PendingChunk {
                page: slot,
                index,
                text,
                retried: false,
            };
            if let Some(batch) = run.planner.push(pending) {
                self.embed(ctx, run, batch).await;
            }
        }
    }

    /// The stored document, if it can stand in for `url` unchanged.
    async fn reusable(&self, ctx: &CrawlContext, url: &str, hash: ContentHash) -> Option<StoredDocument> {
        match self.documents.find_fingerprint(ctx.website_id, url).await {
            Ok(Some(fp)) if fp.content_hash == hash && fp.embedding_model == ctx.model.model => {}
            Ok(_) => return None,
            Err(err) => {
                warn!(url, error = %err, "fingerprint lookup failed, re-embedding");
                return None;
            }
        }

        match self.documents.load_document(ctx.website_id, url).await {
            Ok(Some(doc))
                if doc.content_hash == hash
                    && !doc.chunks.is_empty()
                    && doc.chunks.len() == doc.embeddings.len() =>
            {
                Some(doc)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(url, error = %err, "stored document unreadable, re-embedding");
                None
            }
        }
    }

    async fn embed(&self, ctx: &CrawlContext, run: &mut PrepareRun, batch: Vec<PendingChunk>) {
        let batch: Vec<PendingChunk> = batch
            .into_iter()
            .filter(|c| !run.slots[c.page].failed)
            .collect();
        if batch.is_empty() {
            return;
        }

        run.report.embedding_calls += 1;
        let deadline = ctx.budget.embedding_timeout;
        let result = {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            match timeout(deadline, self.embedder.embed_batch(&texts)).await {
                Ok(Ok(vectors)) => check_vectors(vectors, texts.len(), ctx.model.dimensions),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(EmbeddingError::Timeout {
                    seconds: deadline.as_secs(),
                }),
            }
        };

        match result {
            Ok(vectors) => {
                debug!(size = batch.len(), "embedded batch");
                for (chunk, vector) in batch.into_iter().zip(vectors) {
                    run.slots[chunk.page].embeddings[chunk.index] = Some(vector);
                }
            }
            Err(err) => {
                let reason = match err {
                    EmbeddingError::Timeout { .. } => FailureReason::EmbeddingTimeout,
                    _ => FailureReason::EmbeddingError,
                };
                let detail = err.to_string();
                warn!(size = batch.len(), error = %detail, "embedding batch failed");

                let (second_failures, first_failures): (Vec<_>, Vec<_>) =
                    batch.into_iter().partition(|c| c.retried);
                for chunk in second_failures {
                    run.fail_slot(chunk.page, reason, &detail);
                }

                let retries = first_failures
                    .into_iter()
                    .map(|c| PendingChunk { retried: true, ..c })
                    .collect();
                for chunk in run.planner.seed_retries(retries) {
                    run.fail_slot(chunk.page, reason, &format!("{detail}; no room to retry"));
                }
            }
        }
    }
}

fn check_vectors(
    vectors: Vec<Vec<f32>>,
    expected: usize,
    dimensions: usize,
) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }
    Ok(vectors)
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

async fn read_file_page(path: &Path) -> std::io::Result<RawPage> {
    let bytes = tokio::fs::read(path).await?;
    let mut page = RawPage::new(file_url(path), String::from_utf8_lossy(&bytes).into_owned());
    if let Some(name) = path.file_name() {
        page = page.with_title(name.to_string_lossy());
    }
    Ok(page)
}
