//! Error types for template resolution

use thiserror::Error;

use crate::template::RepositoryError;
use crate::tree::Fqp;

/// Errors that can occur while resolving template references in a document
///
/// Every variant tied to a location carries the FQP of the offending node.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No version matches the reference, or the family has no stable version
    #[error("template not found: {identifier}@{} at '{fqp}'", .version.as_deref().unwrap_or("<stable>"))]
    TemplateNotFound {
        identifier: String,
        version: Option<String>,
        fqp: Fqp,
    },

    /// A template transitively references itself
    #[error("cyclic template reference at '{fqp}': {chain}")]
    CyclicTemplateReference { chain: String, fqp: Fqp },

    /// Nesting deeper than the configured maximum
    #[error("template nesting exceeds the limit of {limit} at '{fqp}'")]
    RecursionLimitExceeded { limit: usize, fqp: Fqp },

    /// Two supplied inputs target the same placeholder
    #[error("ambiguous inputs at '{fqp}': '{identifier}' is supplied more than once")]
    AmbiguousInputMerge { identifier: String, fqp: Fqp },

    /// A supplied input is not one of the placeholder's allowed values
    #[error("value '{value}' at '{fqp}' is not allowed (allowed: {})", .allowed.join(", "))]
    InvalidInputValue {
        value: String,
        allowed: Vec<String>,
        fqp: Fqp,
    },

    /// The reference node itself is malformed or misplaced
    #[error("invalid template reference at '{fqp}': {reason}")]
    InvalidTemplateReference { reason: String, fqp: Fqp },

    /// The fetched template cannot be spliced
    #[error("template {template} cannot be expanded at '{fqp}': {reason}")]
    InvalidTemplateBody {
        template: String,
        reason: String,
        fqp: Fqp,
    },

    /// The downstream validator rejected the expanded document
    #[error("expanded document fails schema validation at '{fqp}': {message}")]
    InvalidYamlSchema { message: String, fqp: Fqp },

    /// The caller may not use a referenced template
    #[error("access denied to template {template} referenced at '{fqp}': {reason}")]
    AccessDenied {
        template: String,
        reason: String,
        fqp: Fqp,
    },

    /// A governance policy rejected the expanded document
    #[error("governance policy denied the document: {reason}")]
    GovernanceDenied { reason: String },

    /// The template repository failed while fetching
    #[error("template repository failed at '{fqp}': {source}")]
    Repository {
        fqp: Fqp,
        #[source]
        source: RepositoryError,
    },

    /// The input document is not valid YAML
    #[error("document is not valid YAML: {0}")]
    MalformedDocument(#[from] serde_yaml::Error),
}

impl ResolveError {
    /// Create a template-not-found error
    pub fn not_found(identifier: impl Into<String>, version: Option<String>, fqp: Fqp) -> Self {
        Self::TemplateNotFound {
            identifier: identifier.into(),
            version,
            fqp,
        }
    }

    /// Create a cycle error from the chain of templates being expanded
    pub fn cyclic(chain: &[String], fqp: Fqp) -> Self {
        Self::CyclicTemplateReference {
            chain: chain.join(" -> "),
            fqp,
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reason: impl Into<String>, fqp: Fqp) -> Self {
        Self::InvalidTemplateReference {
            reason: reason.into(),
            fqp,
        }
    }

    /// Create an invalid template body error
    pub fn invalid_body(template: impl Into<String>, reason: impl Into<String>, fqp: Fqp) -> Self {
        Self::InvalidTemplateBody {
            template: template.into(),
            reason: reason.into(),
            fqp,
        }
    }

    /// Get the offending node's path if available
    pub fn fqp(&self) -> Option<&Fqp> {
        match self {
            Self::TemplateNotFound { fqp, .. }
            | Self::CyclicTemplateReference { fqp, .. }
            | Self::RecursionLimitExceeded { fqp, .. }
            | Self::AmbiguousInputMerge { fqp, .. }
            | Self::InvalidInputValue { fqp, .. }
            | Self::InvalidTemplateReference { fqp, .. }
            | Self::InvalidTemplateBody { fqp, .. }
            | Self::InvalidYamlSchema { fqp, .. }
            | Self::AccessDenied { fqp, .. }
            | Self::Repository { fqp, .. } => Some(fqp),
            Self::GovernanceDenied { .. } | Self::MalformedDocument(_) => None,
        }
    }
}
