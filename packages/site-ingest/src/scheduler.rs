//! Which websites are due for a crawl.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{IngestError, Result};
use crate::id::WebsiteId;
use crate::policy::CircuitBreakerPolicy;
use crate::traits::store::WebsiteStore;
use crate::types::website::Website;

/// The due predicate, minus the active-job exclusion (which only the store
/// can evaluate atomically).
///
/// Day arithmetic is on UTC calendar dates: a DAILY site crawled at 23:59
/// yesterday is due again at 00:00 today.
pub fn is_due(website: &Website, now: DateTime<Utc>) -> bool {
    let Some(interval_days) = website.update_interval.interval_days() else {
        return false;
    };
    if website.is_disabled() {
        return false;
    }
    let interval_elapsed = match website.last_crawled_at {
        None => true,
        Some(last) => (now.date_naive() - last.date_naive()).num_days() >= interval_days,
    };
    let backoff_elapsed = website.next_retry_at.map_or(true, |retry_at| retry_at <= now);
    interval_elapsed && backoff_elapsed
}

/// Read-only scheduling queries plus the manual re-enable.
pub struct CrawlSchedulerService {
    websites: Arc<dyn WebsiteStore>,
    policy: CircuitBreakerPolicy,
}

impl CrawlSchedulerService {
    pub fn new(websites: Arc<dyn WebsiteStore>) -> Self {
        Self {
            websites,
            policy: CircuitBreakerPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Websites to crawl at `now`. No side effects.
    #[instrument(skip(self))]
    pub async fn get_due_websites(&self, now: DateTime<Utc>) -> Result<Vec<Website>> {
        let candidates = self.websites.due_websites(now).await?;
        let total = candidates.len();
        let due: Vec<Website> = candidates.into_iter().filter(|w| is_due(w, now)).collect();
        if due.len() != total {
            debug!(dropped = total - due.len(), "store returned websites that are not due");
        }
        info!(count = due.len(), "due websites");
        Ok(due)
    }

    /// Clear the breaker on a disabled website so it is scheduled again.
    #[instrument(skip(self))]
    pub async fn reenable(&self, website_id: WebsiteId) -> Result<()> {
        if self.websites.find_website(website_id).await?.is_none() {
            return Err(IngestError::NotFound {
                entity: "website",
                id: website_id.to_string(),
            });
        }
        self.websites
            .apply_breaker(website_id, &self.policy.reenable())
            .await?;
        info!(website_id = %website_id, "website re-enabled");
        Ok(())
    }
}
