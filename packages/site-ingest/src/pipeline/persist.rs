//! Phase 2: write prepared pages in short transactions.
//!
//! Each page is written under its own savepoint as delete-then-insert, so
//! one bad page rolls back alone and re-crawls never duplicate rows. Before
//! each page the open transaction is committed and replaced if its age plus
//! the previous page's write time would pass the wall-clock ceiling. A
//! page write only gets the time left in its transaction; if it runs out,
//! the transaction is committed and the page is retried once in a fresh
//! one with the full ceiling.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::traits::store::{PageSink, PageTransaction};
use crate::types::context::CrawlContext;
use crate::types::page::{FailureReason, PageFailure, PreparedPage};

#[derive(Debug, Default)]
pub struct PersistReport {
    pub pages_persisted: usize,
    pub transactions: usize,
    pub failures: Vec<PageFailure>,
}

pub struct BatchPersister {
    sink: Arc<dyn PageSink>,
}

struct OpenTransaction {
    tx: Box<dyn PageTransaction>,
    started: Instant,
    /// Pages written but not yet committed
    pending: Vec<String>,
    savepoints: usize,
}

enum WriteFailure {
    /// The page rolled back to its savepoint; the transaction is still usable
    Page(String),
    /// Like `Page`, but the write ran out of time
    Timeout(String),
    /// The transaction cannot be trusted any more
    Transaction(String),
}

impl BatchPersister {
    pub fn new(sink: Arc<dyn PageSink>) -> Self {
        Self { sink }
    }

    /// Write every page. Only failing to open a transaction is an error;
    /// everything else is reported per page.
    #[instrument(skip_all, fields(website_id = %ctx.website_id, pages = pages.len()))]
    pub async fn persist(&self, ctx: &CrawlContext, pages: Vec<PreparedPage>) -> Result<PersistReport> {
        let ceiling = ctx.budget.max_transaction_wall_time;
        let mut report = PersistReport::default();
        let mut open: Option<OpenTransaction> = None;
        let mut last_write = Duration::ZERO;

        for page in pages {
            let mut current = match open.take() {
                Some(current) if current.started.elapsed() + last_write <= ceiling => current,
                Some(current) => {
                    debug!(
                        age_ms = current.started.elapsed().as_millis() as u64,
                        "transaction near wall-clock ceiling, rotating"
                    );
                    self.commit(current, &mut report).await;
                    self.begin(&mut report).await?
                }
                None => self.begin(&mut report).await?,
            };

            let mut started = Instant::now();
            let budget = ceiling.saturating_sub(current.started.elapsed());
            let mut result = self.write_page(&mut current, ctx, &page, budget).await;

            // Earlier pages used up the transaction; give this one a fresh start
            if matches!(result, Err(WriteFailure::Timeout(_))) && current.savepoints > 1 {
                debug!(
                    url = %page.url,
                    budget_ms = budget.as_millis() as u64,
                    "page write hit the transaction ceiling, retrying in a fresh transaction"
                );
                self.commit(current, &mut report).await;
                current = self.begin(&mut report).await?;
                started = Instant::now();
                result = self.write_page(&mut current, ctx, &page, ceiling).await;
            }

            open = self.settle(current, page.url, result, &mut report).await;
            last_write = started.elapsed();
        }

        if let Some(current) = open.take() {
            self.commit(current, &mut report).await;
        }

        info!(
            persisted = report.pages_persisted,
            transactions = report.transactions,
            failed = report.failures.len(),
            "pages persisted"
        );
        Ok(report)
    }

    async fn begin(&self, report: &mut PersistReport) -> Result<OpenTransaction> {
        let tx = self.sink.begin().await?;
        report.transactions += 1;
        Ok(OpenTransaction {
            tx,
            started: Instant::now(),
            pending: Vec::new(),
            savepoints: 0,
        })
    }

    /// Record the outcome of one page. Returns the transaction if it is
    /// still usable.
    async fn settle(
        &self,
        mut current: OpenTransaction,
        url: String,
        result: std::result::Result<(), WriteFailure>,
        report: &mut PersistReport,
    ) -> Option<OpenTransaction> {
        match result {
            Ok(()) => {
                current.pending.push(url);
                Some(current)
            }
            Err(WriteFailure::Page(detail)) | Err(WriteFailure::Timeout(detail)) => {
                warn!(url = %url, error = %detail, "page write rolled back");
                report
                    .failures
                    .push(PageFailure::new(url, FailureReason::DbError).with_detail(detail));
                Some(current)
            }
            Err(WriteFailure::Transaction(detail)) => {
                warn!(url = %url, error = %detail, "transaction unusable, abandoning");
                report
                    .failures
                    .push(PageFailure::new(url, FailureReason::DbError).with_detail(detail.clone()));
                self.abandon(current, report, &detail).await;
                None
            }
        }
    }

    /// Write one page under its own savepoint, within `budget`.
    async fn write_page(
        &self,
        current: &mut OpenTransaction,
        ctx: &CrawlContext,
        page: &PreparedPage,
        budget: Duration,
    ) -> std::result::Result<(), WriteFailure> {
        let savepoint = format!("sp_page_{}", current.savepoints);
        current.savepoints += 1;

        current
            .tx
            .savepoint(&savepoint)
            .await
            .map_err(|e| WriteFailure::Transaction(format!("savepoint failed: {e}")))?;

        let write = timeout(
            budget,
            current.tx.replace_page(ctx.website_id, &ctx.model.model, page),
        )
        .await;

        let failure = match write {
            Ok(Ok(())) => {
                return current
                    .tx
                    .release_savepoint(&savepoint)
                    .await
                    .map_err(|e| WriteFailure::Transaction(format!("release savepoint failed: {e}")));
            }
            Ok(Err(err)) => WriteFailure::Page(err.to_string()),
            Err(_) => WriteFailure::Timeout(format!("page write exceeded {}s", budget.as_secs())),
        };

        if let Err(e) = current.tx.rollback_to_savepoint(&savepoint).await {
            let detail = match failure {
                WriteFailure::Page(d) | WriteFailure::Timeout(d) | WriteFailure::Transaction(d) => d,
            };
            return Err(WriteFailure::Transaction(format!(
                "{detail}; savepoint rollback failed: {e}"
            )));
        }
        Err(failure)
    }

    async fn commit(&self, current: OpenTransaction, report: &mut PersistReport) {
        let OpenTransaction { tx, pending, .. } = current;
        match tx.commit().await {
            Ok(()) => {
                debug!(pages = pending.len(), "transaction committed");
                report.pages_persisted += pending.len();
            }
            Err(err) => {
                warn!(pages = pending.len(), error = %err, "commit failed");
                let detail = format!("commit failed: {err}");
                report.failures.extend(
                    pending
                        .into_iter()
                        .map(|url| PageFailure::new(url, FailureReason::DbError).with_detail(detail.clone())),
                );
            }
        }
    }

    async fn abandon(&self, current: OpenTransaction, report: &mut PersistReport, cause: &str) {
        let OpenTransaction { tx, pending, .. } = current;
        if let Err(err) = tx.rollback().await {
            debug!(error = %err, "rollback of abandoned transaction failed");
        }
        let detail = format!("transaction aborted: {cause}");
        report.failures.extend(
            pending
                .into_iter()
                .map(|url| PageFailure::new(url, FailureReason::DbError).with_detail(detail.clone())),
        );
    }
}
