//! View activity (visible/hidden) detection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Whether the view consuming the job list is currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Active,
    Inactive,
}

impl Activity {
    pub fn is_active(&self) -> bool {
        *self == Activity::Active
    }
}

/// Source of activity changes.
///
/// Every subscriber sees the current value immediately and each later change.
/// When the source is dropped, receivers keep the last value they saw.
pub trait ActivitySignal {
    fn subscribe(&self) -> watch::Receiver<Activity>;
}

/// Activity signal driven by explicit show/hide calls from the host.
#[derive(Debug, Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<Activity>>,
}

impl VisibilitySignal {
    pub fn new(initial: Activity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Signal that starts out visible.
    pub fn visible() -> Self {
        Self::new(Activity::Active)
    }

    pub fn set_visible(&self) {
        self.set(Activity::Active);
    }

    pub fn set_hidden(&self) {
        self.set(Activity::Inactive);
    }

    pub fn current(&self) -> Activity {
        *self.tx.borrow()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn set(&self, activity: Activity) {
        // Repeated show/hide calls must not wake subscribers.
        self.tx.send_if_modified(|current| {
            if *current == activity {
                false
            } else {
                *current = activity;
                true
            }
        });
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::visible()
    }
}

impl ActivitySignal for VisibilitySignal {
    fn subscribe(&self) -> watch::Receiver<Activity> {
        self.tx.subscribe()
    }
}
