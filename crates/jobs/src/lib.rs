//! `fieldops-jobs`
//!
//! **Responsibility:** the job data model and the boundary to the job store.
//!
//! This crate provides:
//! - `Job` and its forward-only status lifecycle
//! - `AssigneeRef` and the `UserDirectory` used to display contractors
//! - the status-priority ordering used for every displayed job list
//! - the `JobStore` trait plus an in-memory implementation for tests/dev

pub mod assignee;
pub mod job;
pub mod ordering;
pub mod store;

pub use assignee::{AssigneeRef, UserDirectory, UserProfile};
pub use job::{Evidence, Job, JobId, JobStatus, NewJob};
pub use ordering::sort_by_status_priority;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
