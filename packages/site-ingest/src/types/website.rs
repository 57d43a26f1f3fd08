//! Crawl targets and their scheduling state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{TenantId, WebsiteId};
use crate::policy::{BreakerUpdate, DISABLE_AFTER_FAILURES};
use crate::secret::Secret;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "update_interval", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateInterval {
    Daily,
    EveryOtherDay,
    #[default]
    Weekly,
    Never,
}

impl UpdateInterval {
    /// Days between crawls, `None` for sites that are never re-crawled.
    pub fn interval_days(self) -> Option<i64> {
        match self {
            UpdateInterval::Daily => Some(1),
            UpdateInterval::EveryOtherDay => Some(2),
            UpdateInterval::Weekly => Some(7),
            UpdateInterval::Never => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CrawlType {
    /// Follow links from the root URL
    #[default]
    Website,
    /// Enumerate pages from the site's sitemap
    Sitemap,
    /// Fetch exactly the given URL
    SinglePage,
}

/// Basic-auth credentials for protected sites.
#[derive(Debug, Clone)]
pub struct HttpAuth {
    pub username: String,
    pub password: Secret,
}

impl HttpAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password),
        }
    }
}

/// A crawl target.
///
/// `next_retry_at` is only set while `consecutive_failures > 0`; a success
/// clears both. `disabled_at` marks the permanent stop after too many failures.
#[derive(Debug, Clone)]
pub struct Website {
    pub id: WebsiteId,
    pub tenant_id: TenantId,
    pub url: String,
    pub crawl_type: CrawlType,
    pub update_interval: UpdateInterval,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub http_auth: Option<HttpAuth>,
}

impl Website {
    pub fn new(tenant_id: TenantId, url: impl Into<String>, update_interval: UpdateInterval) -> Self {
        Self {
            id: WebsiteId::new(),
            tenant_id,
            url: url.into(),
            crawl_type: CrawlType::default(),
            update_interval,
            last_crawled_at: None,
            consecutive_failures: 0,
            next_retry_at: None,
            disabled_at: None,
            http_auth: None,
        }
    }

    pub fn with_crawl_type(mut self, crawl_type: CrawlType) -> Self {
        self.crawl_type = crawl_type;
        self
    }

    pub fn with_http_auth(mut self, auth: HttpAuth) -> Self {
        self.http_auth = Some(auth);
        self
    }

    pub fn with_last_crawled_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_crawled_at = Some(at);
        self
    }

    pub fn with_failures(mut self, count: u32, next_retry_at: Option<DateTime<Utc>>) -> Self {
        self.consecutive_failures = count;
        self.next_retry_at = next_retry_at;
        self
    }

    /// Whether the breaker has tripped permanently.
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some() || self.consecutive_failures >= DISABLE_AFTER_FAILURES
    }

    /// Key guarding concurrent attempts on this site.
    pub fn lock_key(&self) -> String {
        lock_key(self.id)
    }

    /// Apply a circuit-breaker decision to this snapshot.
    pub fn apply(&mut self, update: &BreakerUpdate) {
        match *update {
            BreakerUpdate::Success { crawled_at } => {
                self.consecutive_failures = 0;
                self.next_retry_at = None;
                self.last_crawled_at = Some(crawled_at);
            }
            BreakerUpdate::Retry {
                consecutive_failures,
                next_retry_at,
            } => {
                self.consecutive_failures = consecutive_failures;
                self.next_retry_at = Some(next_retry_at);
            }
            BreakerUpdate::Disable {
                consecutive_failures,
                disabled_at,
            } => {
                self.consecutive_failures = consecutive_failures;
                self.next_retry_at = None;
                self.disabled_at = Some(disabled_at);
            }
            BreakerUpdate::Reenable => {
                self.consecutive_failures = 0;
                self.next_retry_at = None;
                self.disabled_at = None;
            }
        }
    }
}

pub fn lock_key(website_id: WebsiteId) -> String {
    format!("crawl:website:{website_id}")
}
