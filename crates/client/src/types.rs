//! Types published to views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldops_jobs::Job;

/// Synchronizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Not started yet.
    Idle,
    /// A fetch the view is waiting on (initial load or manual refresh).
    Loading,
    /// Showing data; background refresh is running.
    Ready,
    /// View hidden; no timer, no remote activity.
    Paused,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Loading => "loading",
            SyncState::Ready => "ready",
            SyncState::Paused => "paused",
        }
    }
}

/// Snapshot of what a view should display.
#[derive(Debug, Clone, PartialEq)]
pub struct JobListView {
    /// Sorted by status priority, then newest first.
    pub jobs: Arc<Vec<Job>>,
    pub state: SyncState,
    /// Error of the most recent failed fetch, cleared by the next success.
    pub last_error: Option<String>,
    /// When the displayed jobs were captured from the store.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Whether the displayed jobs came from the cache.
    pub from_cache: bool,
}

impl JobListView {
    pub fn idle() -> Self {
        Self {
            jobs: Arc::new(Vec::new()),
            state: SyncState::Idle,
            last_error: None,
            fetched_at: None,
            from_cache: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state == SyncState::Loading
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobListView {
    fn default() -> Self {
        Self::idle()
    }
}
