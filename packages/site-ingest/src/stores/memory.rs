//! In-memory storage implementation for testing and development.
//!
//! Implements every store trait on one shared state so a whole crawl
//! attempt can run without a database. Clones share state; use
//! [`MemoryStore::with_new_owner`] to act as a second worker process
//! against the same locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::id::{CrawlJobId, TenantId, WebsiteId};
use crate::policy::BreakerUpdate;
use crate::scheduler::is_due;
use crate::traits::ledger::JobLedger;
use crate::traits::lock::DedupLock;
use crate::traits::store::{DocumentStore, PageSink, PageTransaction, WebsiteStore};
use crate::types::context::EmbeddingModelSpec;
use crate::types::job::{CrawlJob, JobStatus};
use crate::types::page::{DocumentFingerprint, FailureBreakdown, PreparedPage, StoredDocument};
use crate::types::website::Website;

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    owner: Uuid,
}

#[derive(Default)]
struct Inner {
    websites: RwLock<HashMap<WebsiteId, Website>>,
    jobs: RwLock<HashMap<CrawlJobId, CrawlJob>>,
    models: RwLock<HashMap<TenantId, EmbeddingModelSpec>>,
    documents: RwLock<HashMap<(WebsiteId, String), StoredDocument>>,
    locks: Mutex<HashMap<String, LockEntry>>,
    faults: RwLock<Faults>,
    commits: AtomicUsize,
    touches: AtomicUsize,
}

struct LockEntry {
    owner: Uuid,
    expires_at: Instant,
}

#[derive(Default)]
struct Faults {
    fail_writes_for: HashSet<String>,
    write_delay: Option<Duration>,
    fail_next_commit: bool,
    fail_begin: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            owner: Uuid::new_v4(),
        }
    }

    /// Same data, different lock owner.
    pub fn with_new_owner(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            owner: Uuid::new_v4(),
        }
    }

    /// Make `replace_page` fail for this URL.
    pub fn fail_writes_for(self, url: impl Into<String>) -> Self {
        self.inner.faults.write().unwrap().fail_writes_for.insert(url.into());
        self
    }

    /// Delay every page write.
    pub fn with_write_delay(self, delay: Duration) -> Self {
        self.inner.faults.write().unwrap().write_delay = Some(delay);
        self
    }

    pub fn fail_next_commit(self) -> Self {
        self.inner.faults.write().unwrap().fail_next_commit = true;
        self
    }

    pub fn fail_begin(self) -> Self {
        self.inner.faults.write().unwrap().fail_begin = true;
        self
    }

    pub fn insert_website(&self, website: Website) -> WebsiteId {
        let id = website.id;
        self.inner.websites.write().unwrap().insert(id, website);
        id
    }

    pub fn insert_job(&self, job: CrawlJob) -> CrawlJobId {
        let id = job.id;
        self.inner.jobs.write().unwrap().insert(id, job);
        id
    }

    pub fn set_embedding_model(&self, tenant_id: TenantId, spec: EmbeddingModelSpec) {
        self.inner.models.write().unwrap().insert(tenant_id, spec);
    }

    pub fn website(&self, id: WebsiteId) -> Option<Website> {
        self.inner.websites.read().unwrap().get(&id).cloned()
    }

    pub fn job(&self, id: CrawlJobId) -> Option<CrawlJob> {
        self.inner.jobs.read().unwrap().get(&id).cloned()
    }

    pub fn jobs_for(&self, website_id: WebsiteId) -> Vec<CrawlJob> {
        let mut jobs: Vec<CrawlJob> = self
            .inner
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.website_id == website_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    pub fn document(&self, website_id: WebsiteId, url: &str) -> Option<StoredDocument> {
        self.inner
            .documents
            .read()
            .unwrap()
            .get(&(website_id, url.to_string()))
            .cloned()
    }

    pub fn document_count(&self, website_id: WebsiteId) -> usize {
        self.inner
            .documents
            .read()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == website_id)
            .count()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Heartbeats that hit an active job.
    pub fn touch_count(&self) -> usize {
        self.inner.touches.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner
            .locks
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    fn update_job<F>(&self, job_id: CrawlJobId, f: F) -> u64
    where
        F: FnOnce(&mut CrawlJob) -> bool,
    {
        let mut jobs = self.inner.jobs.write().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) => {
                if f(job) {
                    job.updated_at = Utc::now();
                    1
                } else {
                    0
                }
            }
            None => 0,
        }
    }
}

#[async_trait]
impl WebsiteStore for MemoryStore {
    async fn find_website(&self, id: WebsiteId) -> Result<Option<Website>> {
        Ok(self.website(id))
    }

    async fn due_websites(&self, now: DateTime<Utc>) -> Result<Vec<Website>> {
        let websites = self.inner.websites.read().unwrap();
        let jobs = self.inner.jobs.read().unwrap();
        let busy: HashSet<WebsiteId> = jobs
            .values()
            .filter(|j| j.status.is_active())
            .map(|j| j.website_id)
            .collect();

        let mut due: Vec<Website> = websites
            .values()
            .filter(|w| !busy.contains(&w.id) && is_due(w, now))
            .cloned()
            .collect();
        // NULLS FIRST, then oldest crawl
        due.sort_by_key(|w| (w.last_crawled_at.is_some(), w.last_crawled_at, w.id));
        Ok(due)
    }

    async fn apply_breaker(&self, id: WebsiteId, update: &BreakerUpdate) -> Result<()> {
        let mut websites = self.inner.websites.write().unwrap();
        let website = websites.get_mut(&id).ok_or_else(|| IngestError::NotFound {
            entity: "website",
            id: id.to_string(),
        })?;
        website.apply(update);
        Ok(())
    }

    async fn find_embedding_model(&self, tenant_id: TenantId) -> Result<Option<EmbeddingModelSpec>> {
        Ok(self.inner.models.read().unwrap().get(&tenant_id).cloned())
    }
}

#[async_trait]
impl JobLedger for MemoryStore {
    async fn create_job(&self, website_id: WebsiteId) -> Result<Option<CrawlJob>> {
        let mut jobs = self.inner.jobs.write().unwrap();
        if jobs
            .values()
            .any(|j| j.website_id == website_id && j.status.is_active())
        {
            return Ok(None);
        }
        let job = CrawlJob::queued(website_id);
        jobs.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn start(&self, job_id: CrawlJobId) -> Result<u64> {
        Ok(self.update_job(job_id, |job| {
            if job.status != JobStatus::Queued {
                return false;
            }
            job.status = JobStatus::InProgress;
            true
        }))
    }

    async fn touch(&self, job_id: CrawlJobId) -> Result<u64> {
        let rows = self.update_job(job_id, |job| job.status.is_active());
        self.inner.touches.fetch_add(rows as usize, Ordering::SeqCst);
        Ok(rows)
    }

    async fn mark_failed_if_active(&self, job_id: CrawlJobId, message: &str) -> Result<u64> {
        Ok(self.update_job(job_id, |job| {
            if !job.status.is_active() {
                return false;
            }
            job.status = JobStatus::Failed;
            job.error_message = Some(message.to_string());
            true
        }))
    }

    async fn complete(&self, job_id: CrawlJobId, result_location: &str) -> Result<u64> {
        Ok(self.update_job(job_id, |job| {
            job.status = JobStatus::Complete;
            job.result_location = Some(result_location.to_string());
            true
        }))
    }

    async fn record_breakdown(&self, job_id: CrawlJobId, breakdown: &FailureBreakdown) -> Result<()> {
        self.update_job(job_id, |job| {
            job.failure_breakdown = Some(breakdown.clone());
            true
        });
        Ok(())
    }

    async fn find_job(&self, job_id: CrawlJobId) -> Result<Option<CrawlJob>> {
        Ok(self.job(job_id))
    }
}

#[async_trait]
impl DedupLock for MemoryStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.inner.locks.lock().unwrap();
        if locks.get(key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(false);
        }
        locks.insert(
            key.to_string(),
            LockEntry {
                owner: self.owner,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn extend(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut locks = self.inner.locks.lock().unwrap();
        match locks.get_mut(key) {
            Some(entry) if entry.owner == self.owner && entry.expires_at > now => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<bool> {
        let mut locks = self.inner.locks.lock().unwrap();
        if locks.get(key).is_some_and(|entry| entry.owner == self.owner) {
            locks.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_fingerprint(&self, website_id: WebsiteId, url: &str) -> Result<Option<DocumentFingerprint>> {
        Ok(self.document(website_id, url).map(|doc| DocumentFingerprint {
            content_hash: doc.content_hash,
            embedding_model: doc.embedding_model,
        }))
    }

    async fn load_document(&self, website_id: WebsiteId, url: &str) -> Result<Option<StoredDocument>> {
        Ok(self.document(website_id, url))
    }
}

#[async_trait]
impl PageSink for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PageTransaction>> {
        if self.inner.faults.read().unwrap().fail_begin {
            return Err(IngestError::storage("connection pool exhausted"));
        }
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            staged: Vec::new(),
            savepoints: Vec::new(),
        }))
    }
}

/// Writes are staged and applied on commit.
struct MemoryTransaction {
    inner: Arc<Inner>,
    staged: Vec<(WebsiteId, StoredDocument)>,
    savepoints: Vec<(String, usize)>,
}

impl MemoryTransaction {
    fn find_savepoint(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| IngestError::storage(format!("savepoint {name} does not exist")))
    }
}

#[async_trait]
impl PageTransaction for MemoryTransaction {
    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoints.push((name.to_string(), self.staged.len()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.find_savepoint(name)?;
        let staged_len = self.savepoints[pos].1;
        self.staged.truncate(staged_len);
        self.savepoints.truncate(pos + 1);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let pos = self.find_savepoint(name)?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    async fn replace_page(
        &mut self,
        website_id: WebsiteId,
        embedding_model: &str,
        page: &PreparedPage,
    ) -> Result<()> {
        let (delay, fail) = {
            let faults = self.inner.faults.read().unwrap();
            (faults.write_delay, faults.fail_writes_for.contains(&page.url))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(IngestError::storage(format!(
                "duplicate key value violates unique constraint for {}",
                page.url
            )));
        }
        self.staged.retain(|(id, doc)| !(*id == website_id && doc.url == page.url));
        self.staged
            .push((website_id, StoredDocument::from_prepared(page, embedding_model)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        {
            let mut faults = self.inner.faults.write().unwrap();
            if faults.fail_next_commit {
                faults.fail_next_commit = false;
                return Err(IngestError::storage("could not serialize access"));
            }
        }
        let mut documents = self.inner.documents.write().unwrap();
        for (website_id, doc) in self.staged {
            documents.insert((website_id, doc.url.clone()), doc);
        }
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
