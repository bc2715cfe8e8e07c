//! Job list synchronization: cache or fetch, sort, publish, keep fresh.

use std::sync::Arc;

use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use fieldops_jobs::{JobStore, JobStoreError};

use crate::activity::ActivitySignal;
use crate::cache::JobCache;
use crate::config::SyncConfig;
use crate::storage::CacheStorage;
use crate::sync_worker::SyncWorker;
use crate::types::JobListView;

const COMMAND_BUFFER: usize = 16;

pub(crate) enum SyncCommand {
    Refresh {
        reply: oneshot::Sender<Result<usize, SyncError>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("failed to fetch jobs: {0}")]
    Fetch(#[from] JobStoreError),
    #[error("job list synchronizer is not running")]
    Stopped,
}

/// Keeps one view's job list in sync with the store.
///
/// On spawn the cached list is published if still valid; otherwise the store
/// is queried. While the view is active the list is re-fetched every poll
/// interval (subject to the fetch cooldown); while it is hidden nothing
/// happens. Every published list is sorted by status priority.
///
/// Dropping the synchronizer aborts its background task. Use
/// [`shutdown`](Self::shutdown) to stop it and wait for it to finish.
#[derive(Debug)]
pub struct JobListSynchronizer {
    commands: mpsc::Sender<SyncCommand>,
    view: watch::Receiver<JobListView>,
    shutdown: Arc<Notify>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommand::Refresh { .. } => f.write_str("Refresh"),
        }
    }
}

impl JobListSynchronizer {
    /// Start synchronizing on the current tokio runtime.
    pub fn spawn<A>(
        store: Arc<dyn JobStore>,
        cache: JobCache,
        activity: &A,
        config: SyncConfig,
    ) -> Self
    where
        A: ActivitySignal + ?Sized,
    {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (view_tx, view) = watch::channel(JobListView::idle());
        let shutdown = Arc::new(Notify::new());

        let worker = SyncWorker::new(
            store,
            cache,
            config,
            command_rx,
            activity.subscribe(),
            view_tx,
            shutdown.clone(),
        );

        Self {
            commands,
            view,
            shutdown,
            worker: Some(tokio::spawn(worker.run())),
        }
    }

    /// Like [`spawn`](Self::spawn), with a cache built from `config.cache`
    /// over `storage`.
    pub fn spawn_with_storage<A>(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn CacheStorage>,
        activity: &A,
        config: SyncConfig,
    ) -> Self
    where
        A: ActivitySignal + ?Sized,
    {
        let cache = JobCache::new(storage, config.cache.clone());
        Self::spawn(store, cache, activity, config)
    }

    /// Latest published view.
    pub fn view(&self) -> JobListView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<JobListView> {
        self.view.clone()
    }

    /// Wait until the published view satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&JobListView) -> bool,
    ) -> Result<JobListView, SyncError> {
        let mut rx = self.view.clone();
        let view = rx
            .wait_for(predicate)
            .await
            .map(|view| (*view).clone())
            .map_err(|_| SyncError::Stopped)?;
        Ok(view)
    }

    /// Clear the cache and fetch now, ignoring the cooldown.
    ///
    /// Returns the number of jobs published. Joins a fetch that is already in
    /// flight instead of starting a second one.
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(SyncCommand::Refresh { reply })
            .await
            .map_err(|_| SyncError::Stopped)?;
        outcome.await.map_err(|_| SyncError::Stopped)?
    }

    /// Whether the background task is still running.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the background task and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!("job list synchronizer task failed: {}", e);
            }
        }
    }
}

impl Drop for JobListSynchronizer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use fieldops_jobs::{
        AssigneeRef, Evidence, InMemoryJobStore, Job, JobId, JobStatus, NewJob,
    };

    use crate::activity::VisibilitySignal;
    use crate::cache::{CACHE_VERSION, CacheConfig, DEFAULT_CACHE_KEY};
    use crate::mutations::JobMutations;
    use crate::storage::MemoryStorage;
    use crate::types::SyncState;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 25, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn job(id: &str, status: JobStatus, created_at: DateTime<Utc>) -> Job {
        let mut job = Job::open(
            JobId::new(id),
            NewJob::new(format!("job {id}"), "details", "Tech Corp"),
            created_at,
        )
        .unwrap();
        let at = created_at + chrono::Duration::minutes(1);
        if status != JobStatus::Open {
            job.accept(AssigneeRef::from("Mike Johnson"), at).unwrap();
        }
        if status == JobStatus::Onsite || status == JobStatus::Completed {
            job.mark_onsite(at, Evidence::none()).unwrap();
        }
        if status == JobStatus::Completed {
            job.complete(at, Evidence::none()).unwrap();
        }
        job
    }

    fn sample_jobs() -> Vec<Job> {
        vec![
            job("c1", JobStatus::Completed, t(1)),
            job("o3", JobStatus::Open, t(3)),
            job("o2", JobStatus::Open, t(2)),
        ]
    }

    fn ids(view: &JobListView) -> Vec<&str> {
        view.jobs.iter().map(|j| j.id.as_str()).collect()
    }

    /// Delays every fetch so concurrent requests overlap.
    struct SlowStore {
        inner: Arc<InMemoryJobStore>,
        delay: Duration,
        /// Read the jobs when the request starts rather than when it ends.
        snapshot_first: bool,
    }

    impl SlowStore {
        fn new(inner: Arc<InMemoryJobStore>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner,
                delay,
                snapshot_first: false,
            })
        }

        fn snapshotting(inner: Arc<InMemoryJobStore>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner,
                delay,
                snapshot_first: true,
            })
        }
    }

    #[async_trait::async_trait]
    impl JobStore for SlowStore {
        async fn fetch_all_jobs(&self) -> Result<Vec<Job>, JobStoreError> {
            if self.snapshot_first {
                let jobs = self.inner.fetch_all_jobs().await;
                tokio::time::sleep(self.delay).await;
                return jobs;
            }
            tokio::time::sleep(self.delay).await;
            self.inner.fetch_all_jobs().await
        }

        async fn get_job(&self, id: &JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get_job(id).await
        }

        async fn create_job(&self, new: NewJob) -> Result<JobId, JobStoreError> {
            self.inner.create_job(new).await
        }

        async fn update_job(&self, job: &Job) -> Result<(), JobStoreError> {
            self.inner.update_job(job).await
        }

        async fn delete_job(&self, id: &JobId) -> Result<(), JobStoreError> {
            self.inner.delete_job(id).await
        }
    }

    fn setup(config: SyncConfig) -> (Arc<InMemoryJobStore>, JobCache, VisibilitySignal, SyncConfig) {
        (
            Arc::new(InMemoryJobStore::with_jobs(sample_jobs())),
            JobCache::in_memory(),
            VisibilitySignal::visible(),
            config,
        )
    }

    async fn ready(sync: &JobListSynchronizer) -> JobListView {
        sync.wait_for(|v| v.state == SyncState::Ready).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_fetches_once_and_caches_sorted_list() {
        let (store, cache, signal, config) = setup(SyncConfig::default());
        let sync = JobListSynchronizer::spawn(store.clone(), cache.clone(), &signal, config);

        let view = ready(&sync).await;
        assert_eq!(ids(&view), ["o3", "o2", "c1"]);
        assert!(!view.from_cache);
        assert!(view.last_error.is_none());
        assert_eq!(store.fetch_count(), 1);

        let entry = cache.get_entry().await.unwrap();
        assert_eq!(entry.version, CACHE_VERSION);
        assert_eq!(
            Some(entry.timestamp.timestamp_millis()),
            view.fetched_at.map(|at| at.timestamp_millis())
        );
        assert_eq!(entry.jobs, *view.jobs);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn warm_start_serves_cache_without_fetching() {
        let (store, cache, signal, config) = setup(SyncConfig::default());
        cache.set(&sample_jobs()).await;

        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);

        let view = ready(&sync).await;
        assert_eq!(ids(&view), ["o3", "o2", "c1"]);
        assert!(view.from_cache);
        assert_eq!(store.fetch_count(), 0);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_fetch() {
        let inner = Arc::new(InMemoryJobStore::with_jobs(sample_jobs()));
        let store = SlowStore::new(inner.clone(), Duration::from_millis(200));
        let signal = VisibilitySignal::visible();
        let sync = JobListSynchronizer::spawn(store, JobCache::in_memory(), &signal, SyncConfig::default());
        ready(&sync).await;
        assert_eq!(inner.fetch_count(), 1);

        inner
            .create_job(NewJob::new("new job", "details", "Acme"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(sync.refresh(), sync.refresh());
        assert_eq!(a, Ok(4));
        assert_eq!(b, Ok(4));
        assert_eq!(inner.fetch_count(), 2);
        assert_eq!(sync.view().len(), 4);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_during_fetch_is_not_hidden_by_the_cache() {
        let inner = Arc::new(InMemoryJobStore::with_jobs(sample_jobs()));
        let store = SlowStore::snapshotting(inner.clone(), Duration::from_millis(200));
        let cache = JobCache::in_memory();
        let mutations = JobMutations::new(inner.clone(), cache.clone());
        let signal = VisibilitySignal::visible();

        let sync = JobListSynchronizer::spawn(store.clone(), cache.clone(), &signal, SyncConfig::default());

        // Cold-start fetch is still waiting on the store.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sync.view().state, SyncState::Loading);
        mutations
            .create_job(NewJob::new("Roof inspection", "details", "Acme"))
            .await
            .unwrap();

        let view = ready(&sync).await;
        assert_eq!(view.len(), 4);
        assert_eq!(inner.fetch_count(), 2);
        assert_eq!(cache.get().await.map(|jobs| jobs.len()), Some(4));
        sync.shutdown().await;

        let second = JobListSynchronizer::spawn(store, cache, &signal, SyncConfig::default());
        let view = ready(&second).await;
        assert!(view.from_cache);
        assert_eq!(view.len(), 4);
        assert_eq!(inner.fetch_count(), 2);
        second.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn mutation_during_final_fetch_leaves_cache_empty() {
        let inner = Arc::new(InMemoryJobStore::with_jobs(sample_jobs()));
        let store = SlowStore::snapshotting(inner.clone(), Duration::from_millis(200));
        let cache = JobCache::in_memory();
        let mutations = JobMutations::new(inner.clone(), cache.clone());
        let signal = VisibilitySignal::visible();

        let sync = JobListSynchronizer::spawn(store, cache.clone(), &signal, SyncConfig::default());

        // One mutation during the first request, another during the retry.
        tokio::time::sleep(Duration::from_millis(50)).await;
        mutations
            .create_job(NewJob::new("first", "details", "Acme"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        mutations
            .create_job(NewJob::new("second", "details", "Acme"))
            .await
            .unwrap();

        ready(&sync).await;
        assert_eq!(inner.fetch_count(), 2);
        assert!(!cache.is_valid().await);

        sync.shutdown().await;
    }

    /// Synchronizer whose first tick fetch is in flight when this returns.
    async fn tick_in_flight() -> (Arc<InMemoryJobStore>, JobCache, VisibilitySignal, JobListSynchronizer) {
        let inner = Arc::new(InMemoryJobStore::with_jobs(sample_jobs()));
        let store = SlowStore::new(inner.clone(), Duration::from_secs(1));
        let cache = JobCache::in_memory();
        let signal = VisibilitySignal::visible();
        let config = SyncConfig::default()
            .with_poll_interval(Duration::from_secs(10))
            .with_fetch_cooldown(Duration::ZERO);

        let sync = JobListSynchronizer::spawn(store, cache.clone(), &signal, config);
        ready(&sync).await;
        assert_eq!(inner.fetch_count(), 1);

        // Tick fires 10s after the initial fetch and waits 1s on the store.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(inner.fetch_count(), 1);
        assert!(cache.is_valid().await);

        (inner, cache, signal, sync)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_joining_a_tick_fetch_caches_its_result() {
        let (inner, cache, _signal, sync) = tick_in_flight().await;

        assert_eq!(sync.refresh().await, Ok(3));
        assert_eq!(inner.fetch_count(), 2);
        assert!(cache.is_valid().await);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_joining_a_failed_tick_fetch_clears_the_cache() {
        let (inner, cache, _signal, sync) = tick_in_flight().await;
        inner.set_unavailable(true);

        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(JobStoreError::Unavailable(_))));
        assert!(!cache.is_valid().await);
        assert_eq!(sync.view().len(), 3);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_with_storage_uses_configured_cache() {
        let store = Arc::new(InMemoryJobStore::with_jobs(sample_jobs()));
        let storage = Arc::new(MemoryStorage::new());
        let signal = VisibilitySignal::visible();
        let config = SyncConfig::default().with_cache(CacheConfig::default().with_key("dispatch_jobs"));

        let sync = JobListSynchronizer::spawn_with_storage(store, storage.clone(), &signal, config);
        ready(&sync).await;

        assert!(storage.read("dispatch_jobs").await.unwrap().is_some());
        assert_eq!(storage.read(DEFAULT_CACHE_KEY).await.unwrap(), None);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_view_pauses_and_resume_refetches_expired_cache() {
        let (store, cache, signal, config) = setup(
            SyncConfig::default()
                .with_poll_interval(Duration::from_secs(10))
                .with_fetch_cooldown(Duration::ZERO),
        );
        let ttl = cache.config().ttl;
        let sync = JobListSynchronizer::spawn(store.clone(), cache.clone(), &signal, config);
        ready(&sync).await;
        assert_eq!(store.fetch_count(), 1);

        signal.set_hidden();
        sync.wait_for(|v| v.state == SyncState::Paused).await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.fetch_count(), 1);

        // Age the cached entry past its TTL.
        let stale = chrono::Duration::from_std(ttl).unwrap() + chrono::Duration::seconds(1);
        cache.set_at(&sample_jobs(), Utc::now() - stale).await;

        signal.set_visible();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.fetch_count(), 2);
        assert_eq!(sync.view().state, SyncState::Ready);

        // Polling restarted from the resume.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.fetch_count(), 3);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_with_valid_cache_does_not_fetch() {
        let (store, cache, signal, config) = setup(SyncConfig::default());
        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);
        ready(&sync).await;

        signal.set_hidden();
        sync.wait_for(|v| v.state == SyncState::Paused).await.unwrap();
        signal.set_visible();
        ready(&sync).await;

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.fetch_count(), 1);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_within_cooldown_are_skipped() {
        let (store, cache, signal, config) = setup(
            SyncConfig::default()
                .with_poll_interval(Duration::from_secs(10))
                .with_fetch_cooldown(Duration::from_secs(25)),
        );
        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);
        ready(&sync).await;

        // Ticks at 10s and 20s fall inside the cooldown; the one at 30s fetches.
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(store.fetch_count(), 2);

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_last_good_list() {
        let (store, cache, signal, config) = setup(SyncConfig::default());
        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);
        ready(&sync).await;

        store.set_unavailable(true);
        let err = sync.refresh().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch(JobStoreError::Unavailable(_))));

        let view = sync.view();
        assert_eq!(view.state, SyncState::Ready);
        assert_eq!(ids(&view), ["o3", "o2", "c1"]);
        assert!(view.last_error.is_some());

        store.set_unavailable(false);
        assert_eq!(sync.refresh().await, Ok(3));
        assert!(sync.view().last_error.is_none());

        sync.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unsubscribes_and_stops_fetching() {
        let (store, cache, signal, config) = setup(
            SyncConfig::default()
                .with_poll_interval(Duration::from_secs(10))
                .with_fetch_cooldown(Duration::ZERO),
        );
        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);
        let view = sync.subscribe();
        ready(&sync).await;
        assert_eq!(signal.subscriber_count(), 1);
        assert!(sync.is_running());

        sync.shutdown().await;
        assert_eq!(signal.subscriber_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.fetch_count(), 1);
        assert!(view.has_changed().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_signal_keeps_last_activity() {
        let (store, cache, signal, config) = setup(
            SyncConfig::default()
                .with_poll_interval(Duration::from_secs(10))
                .with_fetch_cooldown(Duration::ZERO),
        );
        let sync = JobListSynchronizer::spawn(store.clone(), cache, &signal, config);
        ready(&sync).await;

        drop(signal);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(store.fetch_count(), 2);
        assert_eq!(sync.view().state, SyncState::Ready);

        sync.shutdown().await;
    }
}
