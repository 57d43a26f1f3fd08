//! Distributed dedup lock.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Short-lived mutual exclusion shared by every worker process.
///
/// `try_acquire` is an atomic set-if-absent with expiry; an expired entry
/// counts as absent. `extend` and `release` only touch an entry this
/// instance owns and report whether they did.
#[async_trait]
pub trait DedupLock: Send + Sync {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Push the expiry of a held, unexpired entry to `now + ttl`.
    async fn extend(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn release(&self, key: &str) -> Result<bool>;
}
