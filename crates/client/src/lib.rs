//! `fieldops-client`
//!
//! **Responsibility:** client-side job list caching and synchronization.
//!
//! This crate provides:
//! - `JobCache`: a durable, versioned, time-limited snapshot of the job list
//! - `JobListSynchronizer`: cache-or-fetch decisions, display ordering and a
//!   background refresh loop that pauses while the view is hidden
//! - `JobMutations`: store writes that invalidate the cache
//! - `UserDirectoryStore`: the persisted account directory used to render
//!   assignees
//!
//! The job store stays the authority; the client never edits cached jobs.

pub mod activity;
pub mod cache;
pub mod config;
pub mod directory;
pub mod mutations;
pub mod storage;
pub mod sync;
mod sync_worker;
pub mod types;

pub use activity::{Activity, ActivitySignal, VisibilitySignal};
pub use cache::{CacheConfig, CacheEntry, CacheError, JobCache};
pub use config::SyncConfig;
pub use directory::UserDirectoryStore;
pub use mutations::JobMutations;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use sync::{JobListSynchronizer, SyncError};
pub use types::{JobListView, SyncState};
