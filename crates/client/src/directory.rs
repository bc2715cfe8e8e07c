//! Durable user directory (account id → profile).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use fieldops_core::UserId;
use fieldops_jobs::{UserDirectory, UserProfile};

use crate::storage::CacheStorage;

/// Storage key of the persisted directory.
pub const USER_DIRECTORY_KEY: &str = "user_mapping_cache";

/// Loads and saves a [`UserDirectory`] in a [`CacheStorage`] slot.
///
/// Seed entries are merged over whatever was stored on every load. Read and
/// write failures are logged; the in-memory directory stays usable.
#[derive(Debug, Clone)]
pub struct UserDirectoryStore {
    storage: Arc<dyn CacheStorage>,
    key: String,
    seed: Vec<(UserId, UserProfile)>,
}

impl UserDirectoryStore {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            storage,
            key: USER_DIRECTORY_KEY.to_string(),
            seed: Vec::new(),
        }
    }

    /// Known accounts that always win over stored entries.
    pub fn with_seed(mut self, seed: impl IntoIterator<Item = (UserId, UserProfile)>) -> Self {
        self.seed.extend(seed);
        self
    }

    /// Stored directory merged with the seed; the merge is written back.
    pub async fn load(&self) -> UserDirectory {
        let stored = match self.storage.read(&self.key).await {
            Ok(Some(raw)) => match serde_json::from_str::<UserDirectory>(&raw) {
                Ok(directory) => directory,
                Err(e) => {
                    warn!(key = %self.key, error = %e, "ignoring corrupt user directory");
                    UserDirectory::new()
                }
            },
            Ok(None) => UserDirectory::new(),
            Err(e) => {
                warn!(key = %self.key, error = ?e, "failed to read user directory");
                UserDirectory::new()
            }
        };

        let directory = stored.with_seed(self.seed.iter().cloned());
        debug!(key = %self.key, users = directory.len(), "user directory loaded");
        self.save(&directory).await;
        directory
    }

    /// Record an account and persist the directory.
    pub async fn add_user(
        &self,
        directory: &mut UserDirectory,
        id: UserId,
        email: impl Into<String>,
        name: Option<String>,
        at: DateTime<Utc>,
    ) {
        directory.add_user(id, email, name, at);
        self.save(directory).await;
    }

    pub async fn save(&self, directory: &UserDirectory) {
        let payload = match serde_json::to_string(directory) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to serialize user directory");
                return;
            }
        };
        if let Err(e) = self.storage.write(&self.key, &payload).await {
            warn!(key = %self.key, error = ?e, "failed to save user directory");
        }
    }
}
