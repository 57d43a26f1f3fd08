//! Crawl job ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{CrawlJobId, WebsiteId};
use crate::types::page::FailureBreakdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "crawl_job_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Queued,
    InProgress,
    Complete,
    Failed,
}

impl JobStatus {
    /// Queued or in progress; at most one such job exists per website.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// One scheduled or running crawl attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: CrawlJobId,
    pub website_id: WebsiteId,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub result_location: Option<String>,
    pub failure_breakdown: Option<FailureBreakdown>,
    pub created_at: DateTime<Utc>,
    /// Heartbeat
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    pub fn queued(website_id: WebsiteId) -> Self {
        let now = Utc::now();
        Self {
            id: CrawlJobId::new(),
            website_id,
            status: JobStatus::Queued,
            error_message: None,
            result_location: None,
            failure_breakdown: None,
            created_at: now,
            updated_at: now,
        }
    }
}
