//! Template Resolver - expands template references in YAML documents
//!
//! This library resolves reference nodes in an ordered YAML/JSON tree against a store
//! of versioned templates, merges caller-supplied inputs into each template's
//! placeholders, and keeps each template family's stable/last-updated flags consistent.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use template_resolver::{
//!     resolve, InMemoryTemplateStore, Scope, TemplateEntity, VersionConfig, VersionManager,
//! };
//!
//! let store = Arc::new(InMemoryTemplateStore::new());
//! let versions = VersionManager::new(store.clone(), &VersionConfig::default());
//! let entity = TemplateEntity::from_yaml(
//!     Scope::account("acc"),
//!     "template:\n  identifier: run\n  versionLabel: v1\n  type: Step\n  spec:\n    type: Run\n    spec:\n      command: <+input>\n",
//! ).unwrap();
//! versions.create(entity, true).unwrap();
//!
//! let out = resolve(
//!     store.as_ref(),
//!     "step:\n  template:\n    templateRef: run\n    templateInputs:\n      spec:\n        command: make\n",
//!     &Scope::account("acc"),
//! ).unwrap();
//! assert_eq!(out.document["step"]["spec"]["command"].as_str(), Some("make"));
//! assert_eq!(out.references[0].version_label, "v1");
//! ```

pub mod config;
pub mod error;
pub mod service;
pub mod template;
pub mod tree;
pub mod version;

pub use config::{Config, ConfigError, ResolverConfig, VersionConfig};
pub use error::ResolveError;
pub use service::{
    AccessControl, AllowAll, GovernancePolicy, SchemaValidator, SchemaViolation, TemplateService,
    UsagePublisher,
};
pub use template::{
    input_schema, merge_inputs, retain_variables, EntityType, FamilyKey, Resolution,
    ResolveOptions, Resolver, Scope, TemplateEntity, TemplateError, TemplateKey,
    TemplateReference, TemplateReferenceSummary, TemplateRepository,
};
pub use tree::{compute_paths, Fqp};
pub use version::{InMemoryTemplateStore, TemplateStore, VersionError, VersionManager};

use thiserror::Error;

/// Errors from any stage of loading, versioning or resolving templates
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Error during resolution
    #[error("resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Error during a version transition
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Error reading a template definition
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// Error loading configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reading or writing YAML outside resolution
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A caller-supplied argument is malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Resolve YAML text with the default configuration and no hooks
///
/// References with no scope prefix resolve in `scope`.
pub fn resolve(
    repository: &dyn TemplateRepository,
    source: &str,
    scope: &Scope,
) -> Result<Resolution, ResolveError> {
    resolve_with_config(repository, source, scope, ResolverConfig::default())
}

/// Resolve YAML text with a custom configuration
///
/// # Example
///
/// ```rust
/// use template_resolver::{resolve_with_config, InMemoryTemplateStore, ResolverConfig, Scope};
///
/// let store = InMemoryTemplateStore::new();
/// let config = ResolverConfig::default().with_max_depth(5);
/// let out = resolve_with_config(&store, "a: 1", &Scope::account("acc"), config).unwrap();
/// assert!(out.references.is_empty());
/// ```
pub fn resolve_with_config(
    repository: &dyn TemplateRepository,
    source: &str,
    scope: &Scope,
    config: ResolverConfig,
) -> Result<Resolution, ResolveError> {
    let document: serde_yaml::Value = serde_yaml::from_str(source)?;
    Resolver::new(repository, config).resolve(document, scope, &ResolveOptions::default())
}
