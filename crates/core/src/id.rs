//! Identifiers issued by the external auth provider.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a user account (contractor or office staff).
///
/// Accounts are created by the auth provider, which hands out hyphenated
/// UUIDs; this crate never mints them outside of tests.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the canonical hyphenated form only (`8-4-4-4-12` hex digits).
    ///
    /// Simple, braced and URN forms are rejected so that free-text values
    /// which merely happen to be 32 hex digits are not mistaken for accounts.
    pub fn parse_hyphenated(s: &str) -> Result<Self, DomainError> {
        if s.len() != 36 {
            return Err(DomainError::invalid_id(format!(
                "UserId: expected 36 characters, got {}",
                s.len()
            )));
        }
        s.parse()
    }

    /// First eight characters of the hyphenated form, for compact display.
    pub fn short(&self) -> String {
        let mut s = self.0.hyphenated().to_string();
        s.truncate(8);
        s
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("UserId: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hyphenated_uuid() {
        let id = UserId::parse_hyphenated("8e08c810-8a76-4ca9-a484-059d994cad08").unwrap();
        assert_eq!(id.to_string(), "8e08c810-8a76-4ca9-a484-059d994cad08");
        assert_eq!(id.short(), "8e08c810");
    }

    #[test]
    fn rejects_simple_form_and_free_text() {
        assert!(UserId::parse_hyphenated("8e08c8108a764ca9a484059d994cad08").is_err());
        assert!(UserId::parse_hyphenated("John Smith").is_err());
        assert!(matches!(
            UserId::parse_hyphenated("zzzzzzzz-8a76-4ca9-a484-059d994cad08"),
            Err(DomainError::InvalidId(_))
        ));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = UserId::parse_hyphenated("8e08c810-8a76-4ca9-a484-059d994cad08").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"8e08c810-8a76-4ca9-a484-059d994cad08\"");
    }
}
