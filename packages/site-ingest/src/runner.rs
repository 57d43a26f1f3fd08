//! Runs every due website through the orchestrator on a bounded pool.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::id::WebsiteId;
use crate::orchestrator::{AttemptState, CrawlOrchestrator, CrawlSummary};
use crate::scheduler::CrawlSchedulerService;

/// Tally of one `run_due` pass.
#[derive(Debug, Default)]
pub struct RunReport {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Attempts whose bookkeeping itself errored
    pub errors: Vec<(WebsiteId, String)>,
    pub summaries: Vec<CrawlSummary>,
}

impl RunReport {
    fn record(&mut self, website_id: WebsiteId, result: Result<CrawlSummary>) {
        match result {
            Ok(summary) => {
                match summary.state {
                    AttemptState::Succeeded => self.succeeded += 1,
                    AttemptState::Failed => self.failed += 1,
                    _ => self.skipped += 1,
                }
                self.summaries.push(summary);
            }
            Err(err) => {
                error!(website_id = %website_id, error = %err, "crawl attempt errored");
                self.errors.push((website_id, err.to_string()));
            }
        }
    }
}

pub struct CrawlRunner {
    scheduler: CrawlSchedulerService,
    orchestrator: Arc<CrawlOrchestrator>,
    concurrency: usize,
}

impl CrawlRunner {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>) -> Self {
        let scheduler = CrawlSchedulerService::new(orchestrator.stores().websites.clone());
        let concurrency = orchestrator.config().worker_concurrency.max(1);
        Self {
            scheduler,
            orchestrator,
            concurrency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Crawl everything due at `now`, at most `concurrency` at a time.
    #[instrument(skip(self), fields(concurrency = self.concurrency))]
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let due = self.scheduler.get_due_websites(now).await?;
        let mut report = RunReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            info!("no websites due");
            return Ok(report);
        }

        let results: Vec<(WebsiteId, Result<CrawlSummary>)> = stream::iter(due)
            .map(|website| {
                let orchestrator = self.orchestrator.clone();
                async move { (website.id, orchestrator.run(website.id, None).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (website_id, result) in results {
            report.record(website_id, result);
        }

        info!(
            due = report.due,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors.len(),
            "crawl pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::id::TenantId;
    use crate::orchestrator::IngestStores;
    use crate::stores::memory::MemoryStore;
    use crate::testing::{MockCrawlEngine, MockEmbedder, MockEmbedderFactory, MOCK_PROVIDER};
    use crate::types::context::EmbeddingModelSpec;
    use crate::types::page::RawPage;
    use crate::types::website::{UpdateInterval, Website};

    #[tokio::test]
    async fn runs_only_due_sites_and_tallies_outcomes() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        store.set_embedding_model(tenant, EmbeddingModelSpec::new(MOCK_PROVIDER, "mock-embed", 4));

        let ok = Website::new(tenant, "https://ok.example.org", UpdateInterval::Daily);
        let broken = Website::new(tenant, "https://broken.example.org", UpdateInterval::Weekly);
        let never = Website::new(tenant, "https://never.example.org", UpdateInterval::Never);
        store.insert_website(ok.clone());
        store.insert_website(broken.clone());
        store.insert_website(never);

        let crawler = MockCrawlEngine::new()
            .with_pages(&ok.url, vec![RawPage::new(&ok.url, "Free tax help on Saturdays.")])
            .refuse(&broken.url);
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            IngestStores::from_store(store.clone()),
            Arc::new(crawler),
            Arc::new(MockEmbedderFactory::new(Arc::new(MockEmbedder::new(4)))),
            IngestConfig::default().with_worker_concurrency(2),
        ));

        let report = CrawlRunner::new(orchestrator).run_due(Utc::now()).await.unwrap();

        assert_eq!(report.due, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors.is_empty());
        assert_eq!(store.website(broken.id).unwrap().consecutive_failures, 1);
    }
}
