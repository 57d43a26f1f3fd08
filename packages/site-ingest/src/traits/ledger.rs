//! Job ledger: atomic crawl job state transitions.
//!
//! Every operation is a single conditional statement against the store,
//! never a read followed by a write. Row counts are returned so callers can
//! tell whether their transition actually happened.

use async_trait::async_trait;

use crate::error::Result;
use crate::id::{CrawlJobId, WebsiteId};
use crate::types::job::CrawlJob;
use crate::types::page::FailureBreakdown;

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Insert a queued job unless the website already has an active one.
    async fn create_job(&self, website_id: WebsiteId) -> Result<Option<CrawlJob>>;

    /// Queued -> in progress. Returns 0 if the job was not queued.
    async fn start(&self, job_id: CrawlJobId) -> Result<u64>;

    /// Heartbeat for an active job.
    async fn touch(&self, job_id: CrawlJobId) -> Result<u64>;

    /// Fail the job only if it is still queued or in progress.
    ///
    /// Returns 0 when another path already finished it.
    async fn mark_failed_if_active(&self, job_id: CrawlJobId, message: &str) -> Result<u64>;

    /// Terminal success, issued by the attempt that owns the job.
    async fn complete(&self, job_id: CrawlJobId, result_location: &str) -> Result<u64>;

    /// Attach the per-page failure breakdown shown to admins.
    async fn record_breakdown(&self, job_id: CrawlJobId, breakdown: &FailureBreakdown) -> Result<()>;

    async fn find_job(&self, job_id: CrawlJobId) -> Result<Option<CrawlJob>>;
}
