//! Synchronizer configuration.

use std::time::Duration;

use crate::cache::CacheConfig;

/// Background poll period while the view is active.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Minimum spacing between background fetches.
pub const DEFAULT_FETCH_COOLDOWN: Duration = Duration::from_secs(30);

pub const POLL_INTERVAL_ENV: &str = "FIELDOPS_POLL_INTERVAL_SECS";
pub const FETCH_COOLDOWN_ENV: &str = "FIELDOPS_FETCH_COOLDOWN_SECS";
pub const CACHE_TTL_ENV: &str = "FIELDOPS_CACHE_TTL_SECS";
/// Path of the SQLite cache database used by the `fieldops-sync` host.
pub const CACHE_DB_ENV: &str = "FIELDOPS_CACHE_DB";

/// Configuration for a [`JobListSynchronizer`](crate::JobListSynchronizer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Name for logging
    pub name: String,
    pub poll_interval: Duration,
    pub fetch_cooldown: Duration,
    pub cache: CacheConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            name: "job-list".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_cooldown: DEFAULT_FETCH_COOLDOWN,
            cache: CacheConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Panics on a zero interval (tokio timers reject it).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "poll interval must be non-zero");
        self.poll_interval = interval;
        self
    }

    pub fn with_fetch_cooldown(mut self, cooldown: Duration) -> Self {
        self.fetch_cooldown = cooldown;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Defaults overridden by `FIELDOPS_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`. Missing keys keep the current value;
    /// malformed ones are logged and ignored.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = read_secs(&lookup, POLL_INTERVAL_ENV) {
            if secs == 0 {
                tracing::warn!("{} must be positive; keeping {:?}", POLL_INTERVAL_ENV, self.poll_interval);
            } else {
                self.poll_interval = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = read_secs(&lookup, FETCH_COOLDOWN_ENV) {
            self.fetch_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = read_secs(&lookup, CACHE_TTL_ENV) {
            self.cache.ttl = Duration::from_secs(secs);
        }
        self
    }
}

fn read_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(e) => {
            tracing::warn!("ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
