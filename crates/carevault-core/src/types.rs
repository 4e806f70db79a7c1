//! Identifier newtypes.
//!
//! Organization ids are case-insensitive: [`OrgId`] stores the canonical
//! lowercase form, so comparing two `OrgId`s is always a normalized compare.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

fn check_id(id: &str, name: &'static str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty(name));
    }
    if id.chars().any(char::is_control) {
        return Err(IdError::ControlCharacter(name));
    }
    Ok(())
}

/// A normalized organization identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgId(String);

impl OrgId {
    /// Parse and normalize (trim, lowercase).
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let normalized = raw.trim().to_lowercase();
        check_id(&normalized, "orgId")?;
        Ok(Self(normalized))
    }

    /// The canonical lowercase form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrgId({})", self.0)
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrgId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrgId> for String {
    fn from(id: OrgId) -> Self {
        id.0
    }
}

/// A resource identifier. Case is preserved; surrounding whitespace is not.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Parse (trim, reject empty).
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let trimmed = raw.trim();
        check_id(trimmed, "resourceId")?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
