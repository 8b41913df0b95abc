//! Strongly-typed identifier value objects.
//!
//! Club and user identifiers are opaque strings issued by the identity
//! provider. They end up embedded in document field paths
//! (`memberships.<clubId>`), so construction rejects the characters that
//! would split a path segment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

const MAX_ID_LEN: usize = 128;

fn validate_segment(field: &'static str, id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::empty_field(field));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::out_of_range(
            field,
            1,
            MAX_ID_LEN as i64,
            id.len() as i64,
        ));
    }
    if let Some(bad) = id.chars().find(|c| matches!(c, '/' | '.') || c.is_whitespace()) {
        return Err(ValidationError::invalid_format(
            field,
            format!("must not contain '{}'", bad.escape_default()),
        ));
    }
    Ok(())
}

/// Identifier of a club.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClubId(String);

impl ClubId {
    /// Creates a new ClubId, rejecting empty or path-breaking values.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate_segment("club_id", &id)?;
        Ok(Self(id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClubId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ClubId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClubId> for String {
    fn from(id: ClubId) -> Self {
        id.0
    }
}

/// Identifier of a user (member or host).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a new UserId, returning error if empty or malformed.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        validate_segment("user_id", &id)?;
        Ok(Self(id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn club_id_accepts_plain_value() {
        let id = ClubId::new("club_123").unwrap();
        assert_eq!(id.as_str(), "club_123");
        assert_eq!(format!("{}", id), "club_123");
    }

    #[test]
    fn club_id_rejects_empty_string() {
        match ClubId::new("  ") {
            Err(ValidationError::EmptyField { field }) => assert_eq!(field, "club_id"),
            other => panic!("Expected EmptyField error, got {:?}", other),
        }
    }

    #[test]
    fn user_id_rejects_path_separators() {
        assert!(UserId::new("users/abc").is_err());
        assert!(UserId::new("abc.def").is_err());
        assert!(UserId::new("has space").is_err());
    }

    #[test]
    fn user_id_rejects_overlong_values() {
        let long = "u".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            UserId::new(long),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn ids_deserialize_with_validation() {
        let ok: Result<UserId, _> = serde_json::from_str("\"uid_42\"");
        assert!(ok.is_ok());

        let bad: Result<UserId, _> = serde_json::from_str("\"a/b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ClubId::new("club-9").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"club-9\"");
    }
}
