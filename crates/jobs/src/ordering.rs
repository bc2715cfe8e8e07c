//! Display ordering for job lists.

use std::cmp::Reverse;

use crate::job::Job;

/// Group by status priority (`open < accepted < onsite < completed <
/// unrecognized`), newest `created_at` first within a group.
///
/// The sort is stable, so jobs with equal status and creation time keep the
/// order the store returned them in.
pub fn sort_by_status_priority(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by_key(|job| (job.status.priority(), Reverse(job.created_at)));
    jobs
}
