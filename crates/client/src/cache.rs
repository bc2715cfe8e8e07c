//! Durable snapshot of the last fetched job list.
//!
//! One storage slot holds a [`CacheEntry`]. An entry is served only while it
//! is younger than the TTL and carries the current schema version; anything
//! else (stale, foreign version, unreadable) counts as a miss and is removed.
//! Nothing in here returns an error to callers: the worst case is a miss.
//!
//! Every [`clear`](JobCache::clear) bumps a generation counter shared by all
//! clones of a cache. A writer that captured the generation before a slow
//! fetch can use [`set_if_generation`](JobCache::set_if_generation) so that
//! a snapshot taken before an invalidation is never written after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fieldops_jobs::Job;

use crate::storage::{CacheStorage, MemoryStorage};

/// Storage key of the job list snapshot.
pub const DEFAULT_CACHE_KEY: &str = "jobs_cache";

/// Schema tag written with every entry. Bump it to invalidate all caches.
pub const CACHE_VERSION: &str = "1.0";

/// Maximum age of a servable snapshot.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub key: String,
    pub version: String,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_CACHE_KEY.to_string(),
            version: CACHE_VERSION.to_string(),
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// Persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub jobs: Vec<Job>,
    /// Capture time, stored as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Borrowed form of [`CacheEntry`] used when writing.
#[derive(Serialize)]
struct CacheEntryRef<'a> {
    jobs: &'a [Job],
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    version: &'a str,
}

/// Why a lookup produced no jobs.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no cached entry")]
    Empty,
    #[error("cache storage error: {0}")]
    Storage(String),
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
    #[error("cache version mismatch (found {found}, expected {expected})")]
    VersionMismatch { found: String, expected: String },
    #[error("cache entry expired ({age_ms} ms old)")]
    Expired { age_ms: i64 },
    #[error("failed to serialize jobs for cache: {0}")]
    Serialize(String),
}

/// The job list cache.
///
/// Cheap to clone; clones share the underlying storage slot and the
/// invalidation generation.
#[derive(Debug, Clone)]
pub struct JobCache {
    storage: Arc<dyn CacheStorage>,
    config: CacheConfig,
    generation: Arc<AtomicU64>,
}

impl JobCache {
    pub fn new(storage: Arc<dyn CacheStorage>, config: CacheConfig) -> Self {
        Self {
            storage,
            config,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cache over a fresh [`MemoryStorage`] with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached jobs, if a valid entry exists.
    pub async fn get(&self) -> Option<Vec<Job>> {
        self.get_at(Utc::now()).await
    }

    pub async fn get_at(&self, now: DateTime<Utc>) -> Option<Vec<Job>> {
        self.get_entry_at(now).await.map(|entry| entry.jobs)
    }

    /// Like [`get`](Self::get), but returns the whole entry.
    pub async fn get_entry(&self) -> Option<CacheEntry> {
        self.get_entry_at(Utc::now()).await
    }

    pub async fn get_entry_at(&self, now: DateTime<Utc>) -> Option<CacheEntry> {
        match self.lookup(now).await {
            Ok(entry) => {
                debug!(key = %self.config.key, jobs = entry.jobs.len(), "using cached jobs");
                Some(entry)
            }
            Err(CacheError::Empty) => None,
            Err(err @ CacheError::Storage(_)) => {
                warn!(key = %self.config.key, error = %err, "failed to read job cache");
                None
            }
            Err(err) => {
                debug!(key = %self.config.key, reason = %err, "discarding job cache entry");
                self.remove_entry().await;
                None
            }
        }
    }

    /// Whether [`get`](Self::get) would return jobs.
    pub async fn is_valid(&self) -> bool {
        self.get().await.is_some()
    }

    pub async fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.get_at(now).await.is_some()
    }

    /// Overwrite the entry with `jobs`, stamped now.
    ///
    /// Failures are logged and swallowed; the previous entry (if any) stays.
    pub async fn set(&self, jobs: &[Job]) {
        self.set_at(jobs, Utc::now()).await
    }

    pub async fn set_at(&self, jobs: &[Job], now: DateTime<Utc>) {
        match self.store(jobs, now).await {
            Ok(()) => debug!(key = %self.config.key, jobs = jobs.len(), "jobs cached locally"),
            Err(err) => warn!(key = %self.config.key, error = %err, "failed to cache jobs"),
        }
    }

    /// Number of [`clear`](Self::clear) calls so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Write `jobs` only if the cache has not been cleared since
    /// `generation` was read. Returns whether the entry was kept.
    pub async fn set_if_generation(&self, jobs: &[Job], generation: u64, now: DateTime<Utc>) -> bool {
        if self.generation() != generation {
            debug!(key = %self.config.key, "cache cleared during fetch; not caching jobs");
            return false;
        }

        self.set_at(jobs, now).await;

        // A clear that raced with the write may have removed nothing.
        if self.generation() != generation {
            debug!(key = %self.config.key, "cache cleared while writing; dropping entry");
            self.remove_entry().await;
            return false;
        }
        true
    }

    /// Remove the entry. Idempotent.
    pub async fn clear(&self) {
        self.invalidate().await;
    }

    /// [`clear`](Self::clear), returning the generation it replaced.
    pub async fn invalidate(&self) -> u64 {
        let previous = self.generation.fetch_add(1, Ordering::SeqCst);
        self.remove_entry().await;
        previous
    }

    async fn remove_entry(&self) {
        if let Err(err) = self.storage.remove(&self.config.key).await {
            warn!(key = %self.config.key, error = ?err, "failed to clear job cache");
        }
    }

    /// Read and validate the stored entry without side effects.
    pub async fn lookup(&self, now: DateTime<Utc>) -> Result<CacheEntry, CacheError> {
        let raw = self
            .storage
            .read(&self.config.key)
            .await
            .map_err(|e| CacheError::Storage(format!("{e:#}")))?
            .ok_or(CacheError::Empty)?;

        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        if entry.version != self.config.version {
            return Err(CacheError::VersionMismatch {
                found: entry.version,
                expected: self.config.version.clone(),
            });
        }

        let age_ms = now.signed_duration_since(entry.timestamp).num_milliseconds();
        let ttl_ms = i64::try_from(self.config.ttl.as_millis()).unwrap_or(i64::MAX);
        if age_ms >= ttl_ms {
            return Err(CacheError::Expired { age_ms });
        }

        Ok(entry)
    }

    async fn store(&self, jobs: &[Job], now: DateTime<Utc>) -> Result<(), CacheError> {
        let entry = CacheEntryRef {
            jobs,
            timestamp: now,
            version: &self.config.version,
        };
        let payload =
            serde_json::to_string(&entry).map_err(|e| CacheError::Serialize(e.to_string()))?;

        self.storage
            .write(&self.config.key, &payload)
            .await
            .map_err(|e| CacheError::Storage(format!("{e:#}")))
    }
}
