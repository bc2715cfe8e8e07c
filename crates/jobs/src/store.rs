//! Job store boundary and an in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

use fieldops_core::DomainError;

use crate::assignee::AssigneeRef;
use crate::job::{Evidence, Job, JobId, JobStatus, NewJob};

/// Remote service of record for jobs.
///
/// Implementations own persistence and ordering. All list operations return
/// jobs ordered by `created_at`, newest first.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch every job.
    async fn fetch_all_jobs(&self) -> Result<Vec<Job>, JobStoreError>;

    /// Get a job by id.
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, JobStoreError>;

    /// Create a job from `new`, returning the store-assigned id.
    async fn create_job(&self, new: NewJob) -> Result<JobId, JobStoreError>;

    /// Overwrite a stored job. Last write wins.
    async fn update_job(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Delete a job.
    async fn delete_job(&self, id: &JobId) -> Result<(), JobStoreError>;

    /// Jobs currently in `status`.
    async fn fetch_by_status(&self, status: &JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.fetch_all_jobs().await?;
        Ok(jobs.into_iter().filter(|j| &j.status == status).collect())
    }

    /// Jobs accepted by `assignee`.
    async fn fetch_by_assignee(&self, assignee: &AssigneeRef) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.fetch_all_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|j| j.accepted_by.as_ref() == Some(assignee))
            .collect())
    }

    /// `open → accepted`.
    async fn accept_job(
        &self,
        id: &JobId,
        by: AssigneeRef,
        at: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let mut job = self.require_job(id).await?;
        job.accept(by, at)?;
        self.update_job(&job).await?;
        Ok(job)
    }

    /// `accepted → onsite`.
    async fn mark_onsite(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
        evidence: Evidence,
    ) -> Result<Job, JobStoreError> {
        let mut job = self.require_job(id).await?;
        job.mark_onsite(at, evidence)?;
        self.update_job(&job).await?;
        Ok(job)
    }

    /// `onsite → completed`.
    async fn complete_job(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
        evidence: Evidence,
    ) -> Result<Job, JobStoreError> {
        let mut job = self.require_job(id).await?;
        job.complete(at, evidence)?;
        self.update_job(&job).await?;
        Ok(job)
    }

    /// Toggle the invoiced flag.
    async fn set_invoiced(&self, id: &JobId, invoiced: bool) -> Result<Job, JobStoreError> {
        let mut job = self.require_job(id).await?;
        job.set_invoiced(invoiced);
        self.update_job(&job).await?;
        Ok(job)
    }

    /// Like `get_job`, but a missing job is an error.
    async fn require_job(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.get_job(id)
            .await?
            .ok_or_else(|| JobStoreError::NotFound(id.clone()))
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("rejected: {0}")]
    Rejected(#[from] DomainError),
    /// Transient failure reaching the store; the caller may try again later.
    #[error("job store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobStoreError::Unavailable(_))
    }
}

/// In-memory job store for tests/dev.
///
/// Can be switched into an "unavailable" mode to simulate network failures.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed the store with existing jobs (ids are kept).
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.jobs.write() {
            map.extend(jobs.into_iter().map(|j| (j.id.clone(), j)));
        }
        store
    }

    /// Make every subsequent call fail with `Unavailable` (or stop doing so).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `fetch_all_jobs` calls that reached the store.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), JobStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(JobStoreError::Unavailable("in-memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.check_available()?;
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.check_available()?;
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn fetch_all_jobs(&self) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let mut result: Vec<Job> = jobs.values().cloned().collect();
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(result)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn create_job(&self, new: NewJob) -> Result<JobId, JobStoreError> {
        let id = JobId::generate();
        let job = Job::open(id.clone(), new, Utc::now())?;

        self.write()?.insert(id.clone(), job);
        debug!(job_id = %id, "job created");
        Ok(id)
    }

    async fn update_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                debug!(job_id = %job.id, status = %job.status, "job updated");
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id.clone())),
        }
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), JobStoreError> {
        match self.write()?.remove(id) {
            Some(_) => {
                debug!(job_id = %id, "job deleted");
                Ok(())
            }
            None => Err(JobStoreError::NotFound(id.clone())),
        }
    }
}
