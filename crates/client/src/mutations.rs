//! Job store writes that keep the local cache honest.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use fieldops_jobs::{AssigneeRef, Evidence, Job, JobId, JobStore, JobStoreError, NewJob};

use crate::cache::JobCache;

/// Write access to the job store for application code.
///
/// Every call invalidates the job cache afterwards, whether or not the store
/// reported success: a write that timed out may still have been applied.
#[derive(Clone)]
pub struct JobMutations {
    store: Arc<dyn JobStore>,
    cache: JobCache,
}

impl JobMutations {
    pub fn new(store: Arc<dyn JobStore>, cache: JobCache) -> Self {
        Self { store, cache }
    }

    pub async fn create_job(&self, new: NewJob) -> Result<JobId, JobStoreError> {
        let result = self.store.create_job(new).await;
        self.invalidate("create_job").await;
        result
    }

    pub async fn accept_job(
        &self,
        id: &JobId,
        by: AssigneeRef,
        at: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let result = self.store.accept_job(id, by, at).await;
        self.invalidate("accept_job").await;
        result
    }

    pub async fn mark_onsite(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
        evidence: Evidence,
    ) -> Result<Job, JobStoreError> {
        let result = self.store.mark_onsite(id, at, evidence).await;
        self.invalidate("mark_onsite").await;
        result
    }

    pub async fn complete_job(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
        evidence: Evidence,
    ) -> Result<Job, JobStoreError> {
        let result = self.store.complete_job(id, at, evidence).await;
        self.invalidate("complete_job").await;
        result
    }

    pub async fn set_invoiced(&self, id: &JobId, invoiced: bool) -> Result<Job, JobStoreError> {
        let result = self.store.set_invoiced(id, invoiced).await;
        self.invalidate("set_invoiced").await;
        result
    }

    pub async fn delete_job(&self, id: &JobId) -> Result<(), JobStoreError> {
        let result = self.store.delete_job(id).await;
        self.invalidate("delete_job").await;
        result
    }

    async fn invalidate(&self, operation: &'static str) {
        self.cache.clear().await;
        tracing::debug!(operation, "job cache invalidated after mutation");
    }
}

impl std::fmt::Debug for JobMutations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMutations")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldops_jobs::{InMemoryJobStore, JobStatus};

    fn fixture() -> (Arc<InMemoryJobStore>, JobCache, JobMutations) {
        let store = InMemoryJobStore::arc();
        let cache = JobCache::in_memory();
        let mutations = JobMutations::new(store.clone(), cache.clone());
        (store, cache, mutations)
    }

    async fn prime(store: &InMemoryJobStore, cache: &JobCache) {
        let jobs = store.fetch_all_jobs().await.unwrap();
        cache.set(&jobs).await;
        assert!(cache.is_valid().await);
    }

    #[tokio::test]
    async fn successful_writes_clear_the_cache() {
        let (store, cache, mutations) = fixture();

        prime(&store, &cache).await;
        let id = mutations
            .create_job(NewJob::new("AC repair", "details", "Tech Corp"))
            .await
            .unwrap();
        assert!(!cache.is_valid().await);

        prime(&store, &cache).await;
        let job = mutations
            .accept_job(&id, AssigneeRef::from("Mike Johnson"), Utc::now())
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Accepted);
        assert!(!cache.is_valid().await);

        prime(&store, &cache).await;
        mutations.set_invoiced(&id, true).await.unwrap();
        assert!(!cache.is_valid().await);

        prime(&store, &cache).await;
        mutations.delete_job(&id).await.unwrap();
        assert!(!cache.is_valid().await);
    }

    #[tokio::test]
    async fn failed_writes_also_clear_the_cache() {
        let (store, cache, mutations) = fixture();
        let id = mutations
            .create_job(NewJob::new("Panel upgrade", "details", "Shopping Mall"))
            .await
            .unwrap();

        prime(&store, &cache).await;
        let err = mutations
            .complete_job(&id, Utc::now(), Evidence::none())
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Rejected(_)));
        assert!(!cache.is_valid().await);

        prime(&store, &cache).await;
        store.set_unavailable(true);
        let err = mutations
            .mark_onsite(&id, Utc::now(), Evidence::none())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!cache.is_valid().await);
    }
}
