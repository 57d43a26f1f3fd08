//! Embedding backend capability.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{EmbeddingResult, Result};
use crate::types::context::EmbeddingModelSpec;

/// Turns text into vectors.
///
/// Implementations do not enforce a deadline themselves; callers wrap
/// `embed_batch` in their own timeout.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model name the backend reports. Stored documents carry the tenant's
    /// configured name; a mismatch is only logged.
    fn model(&self) -> &str;

    /// Vector length the backend produces.
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// Builds an embedder for a tenant's model spec.
///
/// Fails with `MissingProvider` when the spec names a provider this
/// process cannot serve.
pub trait EmbedderFactory: Send + Sync {
    fn build(&self, spec: &EmbeddingModelSpec) -> Result<Arc<dyn Embedder>>;
}
