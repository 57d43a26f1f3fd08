//! Crawl Scheduling and Two-Phase Ingestion
//!
//! Decides which websites to (re)crawl, keeps chronically failing sites
//! from hammering the workers, and turns crawled pages into stored,
//! embedded documents without holding a database transaction open across
//! network calls.
//!
//! # Design
//!
//! - **Compute, then persist.** Phase 1 chunks, hashes and embeds with no
//!   transaction open; Phase 2 writes in short savepointed transactions.
//! - **Partial success is normal.** Per-page problems become
//!   [`PageFailure`]s in the job's breakdown; only whole-attempt problems
//!   fail the job.
//! - **Coordination through storage.** The dedup lock and the job ledger
//!   are the only cross-process state.
//!
//! # Usage
//!
//! ```rust,ignore
//! use site_ingest::{CrawlOrchestrator, CrawlRunner, IngestConfig, IngestStores, PostgresStore, ProviderRegistry};
//!
//! let config = IngestConfig::from_env()?;
//! let store = PostgresStore::connect(&database_url).await?;
//! store.migrate().await?;
//!
//! let orchestrator = CrawlOrchestrator::new(
//!     IngestStores::from_store(store),
//!     Arc::new(my_crawl_engine),
//!     Arc::new(ProviderRegistry::new(config.providers.clone())),
//!     config,
//! );
//! let report = CrawlRunner::new(Arc::new(orchestrator)).run_due(Utc::now()).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Crawl engine, embedder, lock, ledger and store contracts
//! - [`types`] - Websites, jobs, pages and per-attempt snapshots
//! - [`policy`] - Circuit breaker decisions
//! - [`scheduler`] - Due-website selection
//! - [`pipeline`] - Chunking, batching, Phase 1 and Phase 2
//! - [`orchestrator`] - One attempt, lock to release
//! - [`runner`] - The due set on a bounded worker pool
//! - [`stores`] - `MemoryStore` and `PostgresStore`
//! - [`embedders`] - OpenAI and Ollama backends
//! - [`testing`] - Mock crawl engine and embedder

pub mod config;
pub mod embedders;
pub mod error;
pub mod id;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod runner;
pub mod scheduler;
pub mod secret;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use config::{IngestConfig, ProviderCredentials};
pub use embedders::{OllamaEmbedder, OpenAiEmbedder, ProviderKind, ProviderRegistry};
pub use error::{CrawlError, EmbeddingError, IngestError, Result};
pub use id::{CrawlJobId, DocumentId, Id, TenantId, WebsiteId};
pub use orchestrator::{AttemptState, CrawlOrchestrator, CrawlSummary, IngestStores, SkipReason};
pub use pipeline::{BatchPersister, Chunker, ContentPreparer, PersistReport, PrepareReport};
pub use policy::{BreakerUpdate, CircuitBreakerPolicy, DISABLE_AFTER_FAILURES};
pub use runner::{CrawlRunner, RunReport};
pub use scheduler::{is_due, CrawlSchedulerService};
pub use secret::Secret;
pub use stores::{MemoryStore, PostgresStore};
pub use traits::{
    crawler::{CrawlEngine, CrawlOutput, CrawlRequest},
    embedder::{Embedder, EmbedderFactory},
    ledger::JobLedger,
    lock::DedupLock,
    store::{DocumentStore, PageSink, PageTransaction, WebsiteStore},
};
pub use types::{
    context::{BatchBudget, CrawlContext, EmbeddingModelSpec},
    job::{CrawlJob, JobStatus},
    page::{ContentHash, FailureBreakdown, FailureReason, PageFailure, PageOrigin, PreparedPage, RawPage, StoredDocument},
    website::{CrawlType, HttpAuth, UpdateInterval, Website},
};
