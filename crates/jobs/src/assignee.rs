//! Contractor references and the user directory used to display them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fieldops_core::UserId;

/// Who accepted a job.
///
/// Some writers store the contractor's account id, others an email address or
/// a typed-in name. The distinction is made once, when the value is read, so
/// display code never has to re-inspect the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssigneeRef {
    /// An account id issued by the auth provider.
    Id(UserId),
    /// Free text: an email address or a name.
    FreeText(String),
}

impl AssigneeRef {
    pub fn parse(raw: &str) -> Self {
        match UserId::parse_hyphenated(raw) {
            Ok(id) => AssigneeRef::Id(id),
            Err(_) => AssigneeRef::FreeText(raw.to_string()),
        }
    }

    /// The stored string form.
    pub fn as_stored(&self) -> String {
        match self {
            AssigneeRef::Id(id) => id.to_string(),
            AssigneeRef::FreeText(text) => text.clone(),
        }
    }
}

impl From<String> for AssigneeRef {
    fn from(value: String) -> Self {
        match UserId::parse_hyphenated(&value) {
            Ok(id) => AssigneeRef::Id(id),
            Err(_) => AssigneeRef::FreeText(value),
        }
    }
}

impl From<&str> for AssigneeRef {
    fn from(value: &str) -> Self {
        AssigneeRef::parse(value)
    }
}

impl From<UserId> for AssigneeRef {
    fn from(value: UserId) -> Self {
        AssigneeRef::Id(value)
    }
}

impl From<AssigneeRef> for String {
    fn from(value: AssigneeRef) -> Self {
        match value {
            AssigneeRef::Id(id) => id.to_string(),
            AssigneeRef::FreeText(text) => text,
        }
    }
}

/// Known details of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Account id → profile mapping for rendering `AssigneeRef::Id` values.
///
/// Serializes as a JSON object keyed by the hyphenated account id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserDirectory {
    users: BTreeMap<UserId, UserProfile>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `seed` over the current entries; seeded entries win.
    pub fn with_seed(mut self, seed: impl IntoIterator<Item = (UserId, UserProfile)>) -> Self {
        self.users.extend(seed);
        self
    }

    pub fn add_user(
        &mut self,
        id: UserId,
        email: impl Into<String>,
        name: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.users.insert(
            id,
            UserProfile {
                email: email.into(),
                name,
                updated_at: at,
            },
        );
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.users.contains_key(id)
    }

    pub fn email(&self, id: &UserId) -> Option<&str> {
        self.users.get(id).map(|u| u.email.as_str())
    }

    pub fn name(&self, id: &UserId) -> Option<&str> {
        self.users.get(id).and_then(|u| u.name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Name, else email, else a shortened id for unknown accounts.
    pub fn display_name(&self, assignee: &AssigneeRef) -> String {
        match assignee {
            AssigneeRef::FreeText(text) => text.clone(),
            AssigneeRef::Id(id) => self
                .name(id)
                .filter(|n| !n.is_empty())
                .or_else(|| self.email(id).filter(|e| !e.is_empty()))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Unknown ({}...)", id.short())),
        }
    }
}
