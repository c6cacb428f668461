//! Read-side port to wherever template versions are stored

use std::collections::HashMap;

use thiserror::Error;

use super::entity::{FamilyKey, TemplateEntity, TemplateKey};

/// Failure of the backing store (not "template missing", which is `Ok(None)`)
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("template store unavailable: {0}")]
    Unavailable(String),

    #[error("stored template {key} is unreadable: {message}")]
    Corrupt { key: String, message: String },
}

/// Outcome of a batch fetch; partial success is normal
#[derive(Debug, Default)]
pub struct BatchFetch {
    pub found: HashMap<TemplateKey, TemplateEntity>,
    /// Keys that have no matching version
    pub missing: Vec<TemplateKey>,
    /// Keys whose fetch failed
    pub failed: HashMap<TemplateKey, RepositoryError>,
}

impl BatchFetch {
    pub fn merge(&mut self, other: BatchFetch) {
        self.found.extend(other.found);
        self.missing.extend(other.missing);
        self.failed.extend(other.failed);
    }
}

/// Template repository port
pub trait TemplateRepository: Send + Sync {
    /// Fetch one explicit version
    fn get_version(
        &self,
        family: &FamilyKey,
        version: &str,
    ) -> Result<Option<TemplateEntity>, RepositoryError>;

    /// Fetch whichever version of the family is currently stable
    fn get_stable(&self, family: &FamilyKey) -> Result<Option<TemplateEntity>, RepositoryError>;

    /// Whether the identity resolves to a stored version
    fn exists(&self, key: &TemplateKey) -> Result<bool, RepositoryError> {
        self.get(key).map(|e| e.is_some())
    }

    /// Fetch by identity, dispatching on whether a version was given
    fn get(&self, key: &TemplateKey) -> Result<Option<TemplateEntity>, RepositoryError> {
        let family = key.family();
        match &key.version {
            Some(version) => self.get_version(&family, version),
            None => self.get_stable(&family),
        }
    }

    /// Fetch several identities at once
    ///
    /// Backends with a native multi-get should override this; the default issues one
    /// `get` per key.
    fn get_batch(&self, keys: &[TemplateKey]) -> BatchFetch {
        let mut out = BatchFetch::default();
        for key in keys {
            match self.get(key) {
                Ok(Some(entity)) => {
                    out.found.insert(key.clone(), entity);
                }
                Ok(None) => out.missing.push(key.clone()),
                Err(e) => {
                    out.failed.insert(key.clone(), e);
                }
            }
        }
        out
    }
}
