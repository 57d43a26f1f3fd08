//! In-memory fixtures: one store, one tenant, scripted crawler and embedder.

use std::sync::Arc;

use site_ingest::testing::{MockCrawlEngine, MockEmbedder, MockEmbedderFactory, MOCK_MODEL, MOCK_PROVIDER};
use site_ingest::{
    CrawlOrchestrator, EmbeddingModelSpec, IngestConfig, IngestStores, MemoryStore, TenantId, UpdateInterval,
    Website, WebsiteId,
};

pub const DIMENSIONS: usize = 8;

/// Install a subscriber that respects RUST_LOG.
/// Run tests with: RUST_LOG=debug cargo test -- --nocapture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct World {
    pub store: MemoryStore,
    pub tenant: TenantId,
    pub crawler: Arc<MockCrawlEngine>,
    pub embedder: Arc<MockEmbedder>,
    pub config: IngestConfig,
}

impl World {
    pub fn new() -> Self {
        Self::with_parts(MemoryStore::new(), MockCrawlEngine::new(), IngestConfig::default())
    }

    pub fn with_parts(store: MemoryStore, crawler: MockCrawlEngine, config: IngestConfig) -> Self {
        init_tracing();
        let tenant = TenantId::new();
        store.set_embedding_model(tenant, model_spec(MOCK_MODEL));
        Self {
            store,
            tenant,
            crawler: Arc::new(crawler),
            embedder: Arc::new(MockEmbedder::new(DIMENSIONS)),
            config,
        }
    }

    pub fn add_site(&self, url: &str, interval: UpdateInterval) -> WebsiteId {
        self.store.insert_website(Website::new(self.tenant, url, interval))
    }

    pub fn orchestrator(&self) -> CrawlOrchestrator {
        self.orchestrator_on(self.store.clone())
    }

    /// An orchestrator over `store`, which may be a second lock owner.
    pub fn orchestrator_on(&self, store: MemoryStore) -> CrawlOrchestrator {
        CrawlOrchestrator::new(
            IngestStores::from_store(store),
            self.crawler.clone(),
            Arc::new(MockEmbedderFactory::new(self.embedder.clone())),
            self.config.clone(),
        )
    }
}

pub fn model_spec(model: &str) -> EmbeddingModelSpec {
    EmbeddingModelSpec::new(MOCK_PROVIDER, model, DIMENSIONS)
}
