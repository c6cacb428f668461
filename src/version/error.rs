//! Error types for version state transitions

use thiserror::Error;

use crate::template::{EntityType, FamilyKey};

/// Errors raised by the version state machine
///
/// A transition that fails leaves the store exactly as it was.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VersionError {
    /// The transition would leave the family with zero or several stable (or last-updated) members
    #[error("stable version invariant violated for {family}: {reason}")]
    StableVersionInvariantViolation { family: String, reason: String },

    /// A version disagrees with its family's entity type or child type
    #[error("type mismatch in {family}: expected {expected}, found {found}")]
    FamilyTypeMismatch {
        family: String,
        expected: String,
        found: String,
    },

    #[error("template version {family}@{version} not found")]
    TemplateNotFound { family: String, version: String },

    #[error("template version {family}@{version} already exists")]
    TemplateAlreadyExists { family: String, version: String },

    /// The family changed between load and commit
    #[error("concurrent modification of {family} (expected revision {expected}, found {found})")]
    Conflict {
        family: String,
        expected: u64,
        found: u64,
    },

    /// The backing store failed
    #[error("template store failure: {0}")]
    Store(String),
}

impl VersionError {
    pub fn invariant(family: &FamilyKey, reason: impl Into<String>) -> Self {
        Self::StableVersionInvariantViolation {
            family: family.to_string(),
            reason: reason.into(),
        }
    }

    pub fn entity_type_mismatch(family: &FamilyKey, expected: EntityType, found: EntityType) -> Self {
        Self::FamilyTypeMismatch {
            family: family.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn child_type_mismatch(family: &FamilyKey, expected: &str, found: Option<&str>) -> Self {
        Self::FamilyTypeMismatch {
            family: family.to_string(),
            expected: format!("child type {}", expected),
            found: format!("child type {}", found.unwrap_or("<none>")),
        }
    }

    pub fn not_found(family: &FamilyKey, version: impl Into<String>) -> Self {
        Self::TemplateNotFound {
            family: family.to_string(),
            version: version.into(),
        }
    }

    pub fn already_exists(family: &FamilyKey, version: impl Into<String>) -> Self {
        Self::TemplateAlreadyExists {
            family: family.to_string(),
            version: version.into(),
        }
    }

    /// Whether retrying the whole transition may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
