//! Two-phase ingestion.
//!
//! - [`prepare`]: chunk, hash and embed crawled pages with no transaction open
//! - [`persist`]: write prepared pages in short savepointed transactions
//!
//! [`chunker`] and [`batcher`] are the pure building blocks of phase 1.

pub mod batcher;
pub mod chunker;
pub mod persist;
pub mod prepare;

pub use batcher::{BatchLimits, BatchPlanner, Cap, PendingChunk};
pub use chunker::Chunker;
pub use persist::{BatchPersister, PersistReport};
pub use prepare::{ContentPreparer, PrepareReport};
