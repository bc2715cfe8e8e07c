//! Job data model and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fieldops_core::{DomainError, DomainResult};

use crate::assignee::AssigneeRef;

/// Opaque job identifier assigned by the job store.
///
/// Document stores hand out short random keys, relational stores UUIDs; the
/// client never interprets the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh identifier (UUIDv7, time-ordered).
    ///
    /// Only stores call this; clients receive ids from the store.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Priority given to statuses outside the known lifecycle; sorts after all of them.
pub const UNRECOGNIZED_PRIORITY: u16 = 999;

/// Job status lifecycle: `open → accepted → onsite → completed`.
///
/// Values the client does not know (written by a newer or misbehaving writer)
/// are kept verbatim in `Unrecognized` instead of failing deserialization of
/// the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Open,
    Accepted,
    Onsite,
    Completed,
    Unrecognized(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Accepted => "accepted",
            JobStatus::Onsite => "onsite",
            JobStatus::Completed => "completed",
            JobStatus::Unrecognized(raw) => raw,
        }
    }

    /// Display label used by the dashboard.
    pub fn label(&self) -> &str {
        match self {
            JobStatus::Open => "Open",
            JobStatus::Accepted => "Accepted",
            JobStatus::Onsite => "On Site",
            JobStatus::Completed => "Completed",
            JobStatus::Unrecognized(raw) => raw,
        }
    }

    /// Sort priority (lower comes first).
    pub fn priority(&self) -> u16 {
        match self.stage() {
            Some(stage) => u16::from(stage) + 1,
            None => UNRECOGNIZED_PRIORITY,
        }
    }

    /// Zero-based position in the lifecycle; `None` for unrecognized values.
    pub fn stage(&self) -> Option<u8> {
        match self {
            JobStatus::Open => Some(0),
            JobStatus::Accepted => Some(1),
            JobStatus::Onsite => Some(2),
            JobStatus::Completed => Some(3),
            JobStatus::Unrecognized(_) => None,
        }
    }

    /// The only status this one may advance to.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Open => Some(JobStatus::Accepted),
            JobStatus::Accepted => Some(JobStatus::Onsite),
            JobStatus::Onsite => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Unrecognized(_) => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.stage().is_some()
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "open" => JobStatus::Open,
            "accepted" => JobStatus::Accepted,
            "onsite" => JobStatus::Onsite,
            "completed" => JobStatus::Completed,
            _ => JobStatus::Unrecognized(value),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        JobStatus::from(value.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional photo + notes attached when work starts or finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence {
    pub image: Option<String>,
    pub notes: Option<String>,
}

impl Evidence {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Creation payload for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub description: String,
    pub company: String,
}

impl NewJob {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        company: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            company: company.into(),
        }
    }
}

/// One unit of field work, in the shape the job store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub company: String,
    pub status: JobStatus,
    #[serde(default)]
    pub accepted_by: Option<AssigneeRef>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub onsite_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_started_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_started_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_completed_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_completed_notes: Option<String>,
    #[serde(default)]
    pub invoiced: bool,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a freshly created job: `open`, not invoiced, no stage data.
    pub fn open(id: JobId, new: NewJob, created_at: DateTime<Utc>) -> DomainResult<Self> {
        if new.title.trim().is_empty() {
            return Err(DomainError::validation("job title must not be empty"));
        }

        Ok(Self {
            id,
            title: new.title,
            description: new.description,
            company: new.company,
            status: JobStatus::Open,
            accepted_by: None,
            accepted_at: None,
            onsite_time: None,
            completed_time: None,
            work_started_image: None,
            work_started_notes: None,
            work_completed_image: None,
            work_completed_notes: None,
            invoiced: false,
            created_at,
        })
    }

    /// `open → accepted`.
    pub fn accept(&mut self, by: AssigneeRef, at: DateTime<Utc>) -> DomainResult<()> {
        self.advance(JobStatus::Accepted)?;
        self.accepted_by = Some(by);
        self.accepted_at = Some(at);
        Ok(())
    }

    /// `accepted → onsite`, optionally with a "before" photo and notes.
    pub fn mark_onsite(&mut self, at: DateTime<Utc>, evidence: Evidence) -> DomainResult<()> {
        self.advance(JobStatus::Onsite)?;
        self.onsite_time = Some(at);
        self.work_started_image = evidence.image;
        self.work_started_notes = evidence.notes;
        Ok(())
    }

    /// `onsite → completed`, optionally with an "after" photo and notes.
    pub fn complete(&mut self, at: DateTime<Utc>, evidence: Evidence) -> DomainResult<()> {
        self.advance(JobStatus::Completed)?;
        self.completed_time = Some(at);
        self.work_completed_image = evidence.image;
        self.work_completed_notes = evidence.notes;
        Ok(())
    }

    /// Invoicing is tracked independently of the lifecycle.
    pub fn set_invoiced(&mut self, invoiced: bool) {
        self.invoiced = invoiced;
    }

    /// Whether the job has reached or passed `stage`.
    ///
    /// Always `false` when either side is unrecognized.
    pub fn has_reached(&self, stage: &JobStatus) -> bool {
        match (self.status.stage(), stage.stage()) {
            (Some(current), Some(wanted)) => current >= wanted,
            _ => false,
        }
    }

    /// Invariant: each stage field is set iff the job reached that stage.
    ///
    /// Jobs with an unrecognized status cannot be checked and are reported
    /// as consistent.
    pub fn is_consistent(&self) -> bool {
        if !self.status.is_recognized() {
            return true;
        }

        let accepted = self.has_reached(&JobStatus::Accepted);
        accepted == self.accepted_by.is_some()
            && accepted == self.accepted_at.is_some()
            && self.has_reached(&JobStatus::Onsite) == self.onsite_time.is_some()
            && self.has_reached(&JobStatus::Completed) == self.completed_time.is_some()
    }

    fn advance(&mut self, to: JobStatus) -> DomainResult<()> {
        if self.status.next().as_ref() != Some(&to) {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                to.as_str(),
            ));
        }
        self.status = to;
        Ok(())
    }
}
