//! Ingestion configuration loaded from environment variables.

use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::secret::Secret;
use crate::types::context::{BatchBudget, EmbeddingModelSpec};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_BATCH_CONTENT_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_EMBEDDING_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_TRANSACTION_WALL_TIME: Duration = Duration::from_secs(30);

/// Tuning for one worker process.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum chunks per embedding call
    pub batch_size: usize,
    /// Maximum raw chunk bytes per embedding call
    pub max_batch_content_bytes: usize,
    /// Maximum estimated vector bytes per embedding call (`dimensions * 4` per chunk)
    pub max_batch_embedding_bytes: usize,
    /// Hard deadline for a single embedding call
    pub embedding_timeout: Duration,
    /// Wall-clock ceiling for one persistence transaction
    pub max_transaction_wall_time: Duration,
    /// TTL of the per-website dedup lock
    pub lock_ttl: Duration,
    /// How often a running job touches its heartbeat
    pub heartbeat_interval: Duration,
    /// Concurrent crawl attempts per runner
    pub worker_concurrency: usize,
    /// Upper bound on chunk length, in characters
    pub max_chunk_chars: usize,
    /// Characters carried over between adjacent chunks
    pub chunk_overlap_chars: usize,
    /// Used when a tenant has no embedding model of its own
    pub default_embedding_model: Option<EmbeddingModelSpec>,
    pub providers: ProviderCredentials,
}

/// Endpoints and keys for the embedding providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub openai_api_key: Option<Secret>,
    pub openai_base_url: Option<String>,
    pub ollama_base_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_content_bytes: DEFAULT_MAX_BATCH_CONTENT_BYTES,
            max_batch_embedding_bytes: DEFAULT_MAX_BATCH_EMBEDDING_BYTES,
            embedding_timeout: DEFAULT_EMBEDDING_TIMEOUT,
            max_transaction_wall_time: DEFAULT_MAX_TRANSACTION_WALL_TIME,
            lock_ttl: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            worker_concurrency: 4,
            max_chunk_chars: 1500,
            chunk_overlap_chars: 150,
            default_embedding_model: None,
            providers: ProviderCredentials::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Self::default();
        let default_embedding_model = match env::var("DEFAULT_EMBEDDING_PROVIDER").ok() {
            Some(provider) => Some(EmbeddingModelSpec {
                provider,
                model: env::var("DEFAULT_EMBEDDING_MODEL").map_err(|_| {
                    IngestError::Config(
                        "DEFAULT_EMBEDDING_MODEL must be set with DEFAULT_EMBEDDING_PROVIDER"
                            .to_string(),
                    )
                })?,
                dimensions: parse_var("DEFAULT_EMBEDDING_DIMENSIONS", 1536)?,
                api_base: env::var("DEFAULT_EMBEDDING_API_BASE").ok(),
            }),
            None => None,
        };

        Ok(Self {
            batch_size: parse_var("CRAWL_BATCH_SIZE", defaults.batch_size)?,
            max_batch_content_bytes: parse_var(
                "CRAWL_MAX_BATCH_CONTENT_BYTES",
                defaults.max_batch_content_bytes,
            )?,
            max_batch_embedding_bytes: parse_var(
                "CRAWL_MAX_BATCH_EMBEDDING_BYTES",
                defaults.max_batch_embedding_bytes,
            )?,
            embedding_timeout: seconds_var("CRAWL_EMBEDDING_TIMEOUT_SECONDS", defaults.embedding_timeout)?,
            max_transaction_wall_time: seconds_var(
                "CRAWL_MAX_TRANSACTION_WALL_TIME_SECONDS",
                defaults.max_transaction_wall_time,
            )?,
            lock_ttl: seconds_var("CRAWL_LOCK_TTL_SECONDS", defaults.lock_ttl)?,
            heartbeat_interval: seconds_var(
                "CRAWL_HEARTBEAT_INTERVAL_SECONDS",
                defaults.heartbeat_interval,
            )?,
            worker_concurrency: parse_var("CRAWL_WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            max_chunk_chars: parse_var("CRAWL_MAX_CHUNK_CHARS", defaults.max_chunk_chars)?,
            chunk_overlap_chars: parse_var("CRAWL_CHUNK_OVERLAP_CHARS", defaults.chunk_overlap_chars)?,
            default_embedding_model,
            providers: ProviderCredentials {
                openai_api_key: env::var("OPENAI_API_KEY").ok().map(Secret::from),
                openai_base_url: env::var("OPENAI_BASE_URL").ok(),
                ollama_base_url: env::var("OLLAMA_BASE_URL").ok(),
            },
        }
        .validated()?)
    }

    /// Reject settings that would make batching or scheduling degenerate.
    pub fn validated(self) -> Result<Self> {
        if self.batch_size == 0 {
            return Err(IngestError::Config("batch size must be positive".into()));
        }
        if self.worker_concurrency == 0 {
            return Err(IngestError::Config("worker concurrency must be positive".into()));
        }
        if self.max_chunk_chars == 0 {
            return Err(IngestError::Config("max chunk chars must be positive".into()));
        }
        if self.chunk_overlap_chars >= self.max_chunk_chars {
            return Err(IngestError::Config(format!(
                "chunk overlap ({}) must be smaller than max chunk chars ({})",
                self.chunk_overlap_chars, self.max_chunk_chars
            )));
        }
        Ok(self)
    }

    /// The batch/timeout budget copied into every crawl attempt.
    pub fn budget(&self) -> BatchBudget {
        BatchBudget {
            batch_size: self.batch_size,
            max_batch_content_bytes: self.max_batch_content_bytes,
            max_batch_embedding_bytes: self.max_batch_embedding_bytes,
            embedding_timeout: self.embedding_timeout,
            max_transaction_wall_time: self.max_transaction_wall_time,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_batch_content_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_content_bytes = bytes;
        self
    }

    pub fn with_max_batch_embedding_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_embedding_bytes = bytes;
        self
    }

    pub fn with_embedding_timeout(mut self, timeout: Duration) -> Self {
        self.embedding_timeout = timeout;
        self
    }

    pub fn with_max_transaction_wall_time(mut self, ceiling: Duration) -> Self {
        self.max_transaction_wall_time = ceiling;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_worker_concurrency(mut self, workers: usize) -> Self {
        self.worker_concurrency = workers;
        self
    }

    pub fn with_chunking(mut self, max_chars: usize, overlap_chars: usize) -> Self {
        self.max_chunk_chars = max_chars;
        self.chunk_overlap_chars = overlap_chars;
        self
    }

    pub fn with_default_embedding_model(mut self, spec: EmbeddingModelSpec) -> Self {
        self.default_embedding_model = Some(spec);
        self
    }

    pub fn with_providers(mut self, providers: ProviderCredentials) -> Self {
        self.providers = providers;
        self
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| IngestError::Config(format!("{name} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn seconds_var(name: &str, default: Duration) -> Result<Duration> {
    parse_var(name, default.as_secs()).map(Duration::from_secs)
}
