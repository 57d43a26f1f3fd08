//! One crawl attempt for one website.
//!
//! ```text
//! PENDING ──try_acquire──► LOCKED ──start job──► RUNNING ──► SUCCEEDED
//!    │                        │                     └──────► FAILED
//!    └────────────────────────┴──────────────────────────► SKIPPED
//! ```
//!
//! The dedup lock is released on every exit after LOCKED, including a
//! panic, which is resumed once the lock is gone. While RUNNING a
//! heartbeat task touches the job so the reaper can tell it is alive, and
//! extends the lock so long crawls keep it.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::id::{CrawlJobId, WebsiteId};
use crate::pipeline::chunker::Chunker;
use crate::pipeline::persist::BatchPersister;
use crate::pipeline::prepare::ContentPreparer;
use crate::policy::{BreakerUpdate, CircuitBreakerPolicy};
use crate::traits::crawler::CrawlEngine;
use crate::traits::embedder::EmbedderFactory;
use crate::traits::ledger::JobLedger;
use crate::traits::lock::DedupLock;
use crate::traits::store::{DocumentStore, PageSink, WebsiteStore};
use crate::types::context::{CrawlContext, EmbeddingModelSpec};
use crate::types::page::{FailureBreakdown, FailureReason, PageFailure};
use crate::types::website::{lock_key, Website};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Locked,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::Skipped
        )
    }
}

/// Why an attempt ended without touching the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker holds the dedup lock
    Locked,
    /// The website has a queued or in-progress job already
    JobAlreadyActive,
    /// The given job was no longer queued
    JobNotQueued,
    WebsiteNotFound,
}

/// Outcome of one attempt.
#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub website_id: WebsiteId,
    pub job_id: Option<CrawlJobId>,
    pub state: AttemptState,
    pub skip_reason: Option<SkipReason>,
    /// Fatal error message for FAILED attempts
    pub error: Option<String>,
    pub breaker: Option<BreakerUpdate>,
    pub pages_seen: usize,
    pub pages_embedded: usize,
    pub pages_reused: usize,
    pub pages_persisted: usize,
    pub embedding_calls: usize,
    pub transactions: usize,
    pub failures: FailureBreakdown,
}

impl CrawlSummary {
    fn new(website_id: WebsiteId, job_id: Option<CrawlJobId>, state: AttemptState) -> Self {
        Self {
            website_id,
            job_id,
            state,
            skip_reason: None,
            error: None,
            breaker: None,
            pages_seen: 0,
            pages_embedded: 0,
            pages_reused: 0,
            pages_persisted: 0,
            embedding_calls: 0,
            transactions: 0,
            failures: FailureBreakdown::default(),
        }
    }

    fn skipped(website_id: WebsiteId, job_id: Option<CrawlJobId>, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::new(website_id, job_id, AttemptState::Skipped)
        }
    }
}

/// Storage collaborators, usually all backed by one store.
#[derive(Clone)]
pub struct IngestStores {
    pub websites: Arc<dyn WebsiteStore>,
    pub ledger: Arc<dyn JobLedger>,
    pub lock: Arc<dyn DedupLock>,
    pub documents: Arc<dyn DocumentStore>,
    pub sink: Arc<dyn PageSink>,
}

impl IngestStores {
    pub fn from_store<S>(store: S) -> Self
    where
        S: WebsiteStore + JobLedger + DedupLock + DocumentStore + PageSink + 'static,
    {
        let store = Arc::new(store);
        Self {
            websites: store.clone(),
            ledger: store.clone(),
            lock: store.clone(),
            documents: store.clone(),
            sink: store,
        }
    }
}

/// What the two phases produced for a RUNNING attempt.
struct PhaseOutput {
    ctx: CrawlContext,
    pages_seen: usize,
    pages_embedded: usize,
    pages_reused: usize,
    pages_persisted: usize,
    embedding_calls: usize,
    transactions: usize,
    failures: Vec<PageFailure>,
}

pub struct CrawlOrchestrator {
    stores: IngestStores,
    crawler: Arc<dyn CrawlEngine>,
    embedders: Arc<dyn EmbedderFactory>,
    policy: CircuitBreakerPolicy,
    config: IngestConfig,
}

impl CrawlOrchestrator {
    pub fn new(
        stores: IngestStores,
        crawler: Arc<dyn CrawlEngine>,
        embedders: Arc<dyn EmbedderFactory>,
        config: IngestConfig,
    ) -> Self {
        Self {
            stores,
            crawler,
            embedders,
            policy: CircuitBreakerPolicy::default(),
            config,
        }
    }

    pub fn with_policy(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stores(&self) -> &IngestStores {
        &self.stores
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Run one attempt. A job is created unless `job_id` names a queued one.
    ///
    /// Fatal crawl problems end in a FAILED summary, not an `Err`; errors
    /// are reserved for the bookkeeping itself failing.
    #[instrument(skip(self), fields(website_id = %website_id))]
    pub async fn run(&self, website_id: WebsiteId, job_id: Option<CrawlJobId>) -> Result<CrawlSummary> {
        debug!(state = ?AttemptState::Pending, "crawl attempt starting");
        let key = lock_key(website_id);
        if !self.stores.lock.try_acquire(&key, self.config.lock_ttl).await? {
            info!("website locked by another worker, skipping");
            return Ok(CrawlSummary::skipped(website_id, job_id, SkipReason::Locked));
        }
        debug!(state = ?AttemptState::Locked, "lock acquired");

        let outcome = AssertUnwindSafe(self.run_locked(website_id, job_id))
            .catch_unwind()
            .await;

        match self.stores.lock.release(&key).await {
            Ok(true) => debug!("lock released"),
            Ok(false) => warn!("lock expired before release"),
            Err(e) => warn!(error = %e, "failed to release lock, it will expire"),
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                error!("crawl attempt panicked");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn run_locked(&self, website_id: WebsiteId, job_id: Option<CrawlJobId>) -> Result<CrawlSummary> {
        let Some(website) = self.stores.websites.find_website(website_id).await? else {
            warn!("website vanished before the attempt started");
            return Ok(CrawlSummary::skipped(website_id, job_id, SkipReason::WebsiteNotFound));
        };

        let job_id = match job_id {
            Some(id) => id,
            None => match self.stores.ledger.create_job(website_id).await? {
                Some(job) => job.id,
                None => {
                    info!("website already has an active job, skipping");
                    return Ok(CrawlSummary::skipped(website_id, None, SkipReason::JobAlreadyActive));
                }
            },
        };

        if self.stores.ledger.start(job_id).await? == 0 {
            info!(job_id = %job_id, "job no longer queued, skipping");
            return Ok(CrawlSummary::skipped(website_id, Some(job_id), SkipReason::JobNotQueued));
        }
        info!(job_id = %job_id, url = %website.url, state = ?AttemptState::Running, "crawl attempt running");

        let lease = LockLease {
            lock: self.stores.lock.clone(),
            key: website.lock_key(),
            ttl: self.config.lock_ttl,
        };
        let heartbeat = Heartbeat::spawn(
            self.stores.ledger.clone(),
            job_id,
            self.config.heartbeat_interval,
            Some(lease),
        );
        let result = self.execute(&website).await;
        heartbeat.stop().await;

        match result {
            Ok(output) => self.succeed(&website, job_id, output).await,
            Err(err) => self.fail(&website, job_id, err).await,
        }
    }

    /// Both phases, from model resolution to the last commit.
    async fn execute(&self, website: &Website) -> Result<PhaseOutput> {
        let spec = self.resolve_model(website).await?;
        let embedder = self.embedders.build(&spec)?;
        if embedder.model() != spec.model || embedder.dimensions() != spec.dimensions {
            warn!(
                configured_model = %spec.model,
                configured_dimensions = spec.dimensions,
                backend_model = %embedder.model(),
                backend_dimensions = embedder.dimensions(),
                "embedding backend does not match the tenant's model, storing under the configured name"
            );
        }
        let ctx = CrawlContext::new(website, spec, self.config.budget());

        let output = self.crawler.crawl(&ctx.crawl_request()).await?;

        let preparer = ContentPreparer::new(self.stores.documents.clone(), embedder).with_chunker(Chunker::new(
            self.config.max_chunk_chars,
            self.config.chunk_overlap_chars,
        ));
        let prepared = preparer.prepare(&ctx, output).await?;
        if prepared.pages_seen == 0 {
            return Err(IngestError::NoPages { url: ctx.url.clone() });
        }

        let persisted = BatchPersister::new(self.stores.sink.clone())
            .persist(&ctx, prepared.pages)
            .await?;

        let mut failures = prepared.failures;
        failures.extend(persisted.failures);

        Ok(PhaseOutput {
            ctx,
            pages_seen: prepared.pages_seen,
            pages_embedded: prepared.pages_embedded,
            pages_reused: prepared.pages_reused,
            pages_persisted: persisted.pages_persisted,
            embedding_calls: prepared.embedding_calls,
            transactions: persisted.transactions,
            failures,
        })
    }

    /// The tenant's model, else the configured default.
    async fn resolve_model(&self, website: &Website) -> Result<EmbeddingModelSpec> {
        if let Some(spec) = self.stores.websites.find_embedding_model(website.tenant_id).await? {
            return Ok(spec);
        }
        if let Some(spec) = &self.config.default_embedding_model {
            debug!(tenant_id = %website.tenant_id, "tenant has no model, using default");
            return Ok(spec.clone());
        }
        Err(IngestError::NoEmbeddingModel {
            tenant_id: website.tenant_id.to_string(),
        })
    }

    async fn succeed(&self, website: &Website, job_id: CrawlJobId, output: PhaseOutput) -> Result<CrawlSummary> {
        let mut first_error = None;
        let update = self.policy.on_success(Utc::now());
        keep_first(
            &mut first_error,
            self.stores.websites.apply_breaker(website.id, &update).await,
            "apply success to website",
        );

        let breakdown = FailureBreakdown::from_failures(&output.failures);
        if !breakdown.is_empty() {
            keep_first(
                &mut first_error,
                self.stores.ledger.record_breakdown(job_id, &breakdown).await,
                "record failure breakdown",
            );
        }
        if output.pages_persisted == 0 && !breakdown.is_empty() {
            warn!(
                job_id = %job_id,
                failed = breakdown.total(),
                "every page failed, attempt still counts as a success"
            );
        }

        // The job leaves IN_PROGRESS even when the bookkeeping above failed
        keep_first(
            &mut first_error,
            self.stores
                .ledger
                .complete(job_id, &output.ctx.result_location())
                .await,
            "complete job",
        );
        if let Some(err) = first_error {
            return Err(err);
        }

        info!(
            job_id = %job_id,
            seen = output.pages_seen,
            persisted = output.pages_persisted,
            reused = output.pages_reused,
            failed = breakdown.total(),
            state = ?AttemptState::Succeeded,
            "crawl attempt succeeded"
        );

        Ok(CrawlSummary {
            breaker: Some(update),
            pages_seen: output.pages_seen,
            pages_embedded: output.pages_embedded,
            pages_reused: output.pages_reused,
            pages_persisted: output.pages_persisted,
            embedding_calls: output.embedding_calls,
            transactions: output.transactions,
            failures: breakdown,
            ..CrawlSummary::new(website.id, Some(job_id), AttemptState::Succeeded)
        })
    }

    async fn fail(&self, website: &Website, job_id: CrawlJobId, err: IngestError) -> Result<CrawlSummary> {
        let message = err.to_string();
        let mut first_error = None;
        let update = self.policy.on_failure(website.consecutive_failures, Utc::now());
        keep_first(
            &mut first_error,
            self.stores.websites.apply_breaker(website.id, &update).await,
            "apply failure to website",
        );

        match update {
            BreakerUpdate::Disable {
                consecutive_failures, ..
            } => error!(
                job_id = %job_id,
                consecutive_failures,
                error = %message,
                "website disabled after repeated failures"
            ),
            _ => warn!(
                job_id = %job_id,
                consecutive_failures = update.consecutive_failures(),
                error = %message,
                "crawl attempt failed"
            ),
        }

        let mut breakdown = FailureBreakdown::default();
        if let Some(reason) = fatal_reason(&err) {
            breakdown.push(PageFailure::new(website.url.clone(), reason).with_detail(message.clone()));
            keep_first(
                &mut first_error,
                self.stores.ledger.record_breakdown(job_id, &breakdown).await,
                "record failure breakdown",
            );
        }

        match self.stores.ledger.mark_failed_if_active(job_id, &message).await {
            Ok(0) => info!(job_id = %job_id, "job already finished elsewhere, leaving it alone"),
            Ok(_) => {}
            Err(e) => keep_first(&mut first_error, Err::<u64, _>(e), "mark job failed"),
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        Ok(CrawlSummary {
            error: Some(message),
            breaker: Some(update),
            failures: breakdown,
            ..CrawlSummary::new(website.id, Some(job_id), AttemptState::Failed)
        })
    }
}

/// Log a bookkeeping error and hold on to the first one.
fn keep_first<T>(slot: &mut Option<IngestError>, result: Result<T>, action: &'static str) {
    if let Err(err) = result {
        error!(error = %err, action, "attempt bookkeeping failed");
        slot.get_or_insert(err);
    }
}

/// Fatal errors that also have a failure-breakdown reason.
fn fatal_reason(err: &IngestError) -> Option<FailureReason> {
    match err {
        IngestError::NoEmbeddingModel { .. } => Some(FailureReason::NoEmbeddingModel),
        IngestError::MissingProvider { .. } => Some(FailureReason::MissingProvider),
        _ => None,
    }
}

/// Lock held by a running attempt, extended on every heartbeat tick.
struct LockLease {
    lock: Arc<dyn DedupLock>,
    key: String,
    ttl: Duration,
}

impl LockLease {
    async fn extend(&self) {
        match self.lock.extend(&self.key, self.ttl).await {
            Ok(true) => debug!(key = %self.key, "lock extended"),
            Ok(false) => warn!(key = %self.key, "lock no longer held, cannot extend"),
            Err(e) => warn!(key = %self.key, error = %e, "lock extension failed"),
        }
    }
}

/// Periodic `touch` on a running job, plus a lock extension when a lease
/// is given. Stops on `stop` or when dropped.
struct Heartbeat {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    fn spawn(
        ledger: Arc<dyn JobLedger>,
        job_id: CrawlJobId,
        interval: Duration,
        lease: Option<LockLease>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let heartbeat_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match ledger.touch(job_id).await {
                            Ok(0) => warn!(job_id = %job_id, "heartbeat found job no longer active"),
                            Ok(_) => debug!(job_id = %job_id, "heartbeat"),
                            Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                        }
                        if let Some(lease) = &lease {
                            lease.extend().await;
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::MemoryStore;
    use crate::testing::{MockCrawlEngine, MockEmbedder, MockEmbedderFactory, MOCK_PROVIDER};
    use crate::types::job::JobStatus;
    use crate::types::page::RawPage;
    use crate::types::website::UpdateInterval;
    use crate::id::TenantId;

    const SITE: &str = "https://foodshelf.example.org";

    struct Harness {
        store: MemoryStore,
        embedder: Arc<MockEmbedder>,
        website_id: WebsiteId,
    }

    fn harness() -> Harness {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let website_id = store.insert_website(Website::new(tenant, SITE, UpdateInterval::Daily));
        store.set_embedding_model(tenant, EmbeddingModelSpec::new(MOCK_PROVIDER, "mock-embed", 4));
        Harness {
            store,
            embedder: Arc::new(MockEmbedder::new(4)),
            website_id,
        }
    }

    fn orchestrator(h: &Harness, crawler: MockCrawlEngine) -> CrawlOrchestrator {
        CrawlOrchestrator::new(
            IngestStores::from_store(h.store.clone()),
            Arc::new(crawler),
            Arc::new(MockEmbedderFactory::new(h.embedder.clone())),
            IngestConfig::default(),
        )
    }

    #[tokio::test]
    async fn successful_attempt_completes_job_and_resets_breaker() {
        let h = harness();
        h.store
            .apply_breaker(
                h.website_id,
                &BreakerUpdate::Retry {
                    consecutive_failures: 2,
                    next_retry_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        let crawler = MockCrawlEngine::new().with_pages(
            SITE,
            vec![
                RawPage::new(format!("{SITE}/hours"), "Open Tuesday and Thursday."),
                RawPage::new(format!("{SITE}/blank"), "  "),
            ],
        );

        let summary = orchestrator(&h, crawler).run(h.website_id, None).await.unwrap();

        assert_eq!(summary.state, AttemptState::Succeeded);
        assert_eq!(summary.pages_persisted, 1);
        assert_eq!(summary.failures.count(FailureReason::EmptyContent), 1);

        let job = h.store.job(summary.job_id.unwrap()).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(
            job.result_location.as_deref(),
            Some(format!("website_documents/{}", h.website_id).as_str())
        );
        assert_eq!(job.failure_breakdown.unwrap().total(), 1);

        let site = h.store.website(h.website_id).unwrap();
        assert_eq!(site.consecutive_failures, 0);
        assert!(site.next_retry_at.is_none());
        assert!(site.last_crawled_at.is_some());
        assert!(!h.store.is_locked(&lock_key(h.website_id)));
    }

    #[tokio::test]
    async fn zero_pages_fails_the_attempt() {
        let h = harness();

        let summary = orchestrator(&h, MockCrawlEngine::new())
            .run(h.website_id, None)
            .await
            .unwrap();

        assert_eq!(summary.state, AttemptState::Failed);
        assert!(summary.error.unwrap().contains("no pages"));
        let job = h.store.job(summary.job_id.unwrap()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(h.store.website(h.website_id).unwrap().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn missing_model_is_fatal_and_recorded() {
        let store = MemoryStore::new();
        let website_id = store.insert_website(Website::new(TenantId::new(), SITE, UpdateInterval::Daily));
        let h = Harness {
            store,
            embedder: Arc::new(MockEmbedder::new(4)),
            website_id,
        };
        let crawler = MockCrawlEngine::new().with_pages(SITE, vec![RawPage::new(SITE, "text")]);

        let summary = orchestrator(&h, crawler).run(website_id, None).await.unwrap();

        assert_eq!(summary.state, AttemptState::Failed);
        assert_eq!(summary.failures.count(FailureReason::NoEmbeddingModel), 1);
        assert_eq!(h.embedder.call_count(), 0);
    }

    #[tokio::test]
    async fn default_model_covers_tenants_without_one() {
        let store = MemoryStore::new();
        let website_id = store.insert_website(Website::new(TenantId::new(), SITE, UpdateInterval::Daily));
        let embedder = Arc::new(MockEmbedder::new(4));
        let crawler = MockCrawlEngine::new().with_pages(SITE, vec![RawPage::new(SITE, "Rides to appointments.")]);
        let orchestrator = CrawlOrchestrator::new(
            IngestStores::from_store(store.clone()),
            Arc::new(crawler),
            Arc::new(MockEmbedderFactory::new(embedder.clone())),
            IngestConfig::default()
                .with_default_embedding_model(EmbeddingModelSpec::new(MOCK_PROVIDER, "mock-embed", 4)),
        );

        let summary = orchestrator.run(website_id, None).await.unwrap();

        assert_eq!(summary.state, AttemptState::Succeeded);
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn crawl_error_fails_without_touching_documents() {
        let h = harness();
        let crawler = MockCrawlEngine::new().refuse(SITE);

        let summary = orchestrator(&h, crawler).run(h.website_id, None).await.unwrap();

        assert_eq!(summary.state, AttemptState::Failed);
        assert_eq!(h.store.document_count(h.website_id), 0);
        assert!(matches!(
            summary.breaker,
            Some(BreakerUpdate::Retry {
                consecutive_failures: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn held_lock_skips_without_creating_a_job() {
        let h = harness();
        let other_worker = h.store.with_new_owner();
        other_worker
            .try_acquire(&lock_key(h.website_id), Duration::from_secs(60))
            .await
            .unwrap();

        let summary = orchestrator(&h, MockCrawlEngine::new())
            .run(h.website_id, None)
            .await
            .unwrap();

        assert_eq!(summary.state, AttemptState::Skipped);
        assert_eq!(summary.skip_reason, Some(SkipReason::Locked));
        assert!(h.store.jobs_for(h.website_id).is_empty());
        assert!(h.store.is_locked(&lock_key(h.website_id)));
    }

    #[tokio::test]
    async fn finished_job_is_not_restarted() {
        let h = harness();
        let job = h.store.create_job(h.website_id).await.unwrap().unwrap();
        h.store.mark_failed_if_active(job.id, "reaped").await.unwrap();

        let summary = orchestrator(&h, MockCrawlEngine::new())
            .run(h.website_id, Some(job.id))
            .await
            .unwrap();

        assert_eq!(summary.skip_reason, Some(SkipReason::JobNotQueued));
        assert_eq!(h.store.job(job.id).unwrap().error_message.as_deref(), Some("reaped"));
        assert!(!h.store.is_locked(&lock_key(h.website_id)));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_touches_running_job() {
        let h = harness();
        let job = h.store.create_job(h.website_id).await.unwrap().unwrap();
        h.store.start(job.id).await.unwrap();

        let heartbeat = Heartbeat::spawn(Arc::new(h.store.clone()), job.id, Duration::from_secs(30), None);
        tokio::time::sleep(Duration::from_secs(61)).await;
        heartbeat.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Ticks at 30s and 60s; nothing after stop
        assert_eq!(h.store.touch_count(), 2);
    }

    /// Website store whose scheduling writes always fail.
    struct BrokenBreakerStore(MemoryStore);

    #[async_trait::async_trait]
    impl WebsiteStore for BrokenBreakerStore {
        async fn find_website(&self, id: WebsiteId) -> Result<Option<Website>> {
            self.0.find_website(id).await
        }

        async fn due_websites(&self, now: chrono::DateTime<Utc>) -> Result<Vec<Website>> {
            self.0.due_websites(now).await
        }

        async fn apply_breaker(&self, _id: WebsiteId, _update: &BreakerUpdate) -> Result<()> {
            Err(IngestError::storage("connection reset"))
        }

        async fn find_embedding_model(&self, tenant_id: TenantId) -> Result<Option<EmbeddingModelSpec>> {
            self.0.find_embedding_model(tenant_id).await
        }
    }

    fn orchestrator_with_broken_breaker(h: &Harness, crawler: MockCrawlEngine) -> CrawlOrchestrator {
        let mut stores = IngestStores::from_store(h.store.clone());
        stores.websites = Arc::new(BrokenBreakerStore(h.store.clone()));
        CrawlOrchestrator::new(
            stores,
            Arc::new(crawler),
            Arc::new(MockEmbedderFactory::new(h.embedder.clone())),
            IngestConfig::default(),
        )
    }

    #[tokio::test]
    async fn breaker_write_error_still_fails_the_job() {
        let h = harness();
        let crawler = MockCrawlEngine::new().refuse(SITE);

        let result = orchestrator_with_broken_breaker(&h, crawler)
            .run(h.website_id, None)
            .await;

        assert!(matches!(result, Err(IngestError::Storage(_))));
        let jobs = h.store.jobs_for(h.website_id);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].error_message.is_some());
        assert!(!h.store.is_locked(&lock_key(h.website_id)));
    }

    #[tokio::test]
    async fn breaker_write_error_still_completes_the_job() {
        let h = harness();
        let crawler = MockCrawlEngine::new().with_pages(SITE, vec![RawPage::new(SITE, "Open on holidays.")]);

        let result = orchestrator_with_broken_breaker(&h, crawler)
            .run(h.website_id, None)
            .await;

        assert!(matches!(result, Err(IngestError::Storage(_))));
        let jobs = h.store.jobs_for(h.website_id);
        assert_eq!(jobs[0].status, JobStatus::Complete);
        assert_eq!(h.store.document_count(h.website_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn long_crawl_keeps_its_lock() {
        let h = harness();
        let crawler = MockCrawlEngine::new()
            .with_delay(Duration::from_secs(300))
            .with_pages(SITE, vec![RawPage::new(SITE, "Slow site.")]);
        let orchestrator = orchestrator(&h, crawler);
        let website_id = h.website_id;

        let attempt = tokio::spawn(async move { orchestrator.run(website_id, None).await });
        // Well past the 120s lock TTL
        tokio::time::sleep(Duration::from_secs(200)).await;

        let other_worker = h.store.with_new_owner();
        assert!(!other_worker
            .try_acquire(&lock_key(website_id), Duration::from_secs(60))
            .await
            .unwrap());

        let summary = attempt.await.unwrap().unwrap();
        assert_eq!(summary.state, AttemptState::Succeeded);
        assert!(!h.store.is_locked(&lock_key(website_id)));
    }

    #[tokio::test]
    async fn documents_carry_the_tenant_model_name() {
        let store = MemoryStore::new();
        let tenant = TenantId::new();
        let website_id = store.insert_website(Website::new(tenant, SITE, UpdateInterval::Daily));
        store.set_embedding_model(tenant, EmbeddingModelSpec::new(MOCK_PROVIDER, "tenant-embed-v3", 4));
        let h = Harness {
            store,
            embedder: Arc::new(MockEmbedder::new(4)),
            website_id,
        };
        let crawler = MockCrawlEngine::new().with_pages(SITE, vec![RawPage::new(SITE, "Meal delivery.")]);

        let summary = orchestrator(&h, crawler).run(website_id, None).await.unwrap();

        assert_eq!(summary.state, AttemptState::Succeeded);
        let stored = h.store.document(website_id, SITE).unwrap();
        assert_eq!(stored.embedding_model, "tenant-embed-v3");
    }
}
