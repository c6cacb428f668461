//! Write-side storage of template families, with atomic multi-family commits

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::error::VersionError;
use super::family::{Family, FamilyOp};
use crate::template::{
    BatchFetch, FamilyKey, RepositoryError, TemplateEntity, TemplateKey, TemplateRepository,
};

/// A unit of work: ops against one or more families, valid only at the given revisions
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    /// Revision each touched family must still be at
    pub expected: Vec<(FamilyKey, u64)>,
    pub ops: Vec<(FamilyKey, FamilyOp)>,
}

impl Transaction {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Transactional template storage
///
/// `commit` applies every op of a transaction or none of them. It refuses the whole
/// transaction if any family moved past its expected revision, or if any touched family
/// would break its flag or type invariants afterwards.
pub trait TemplateStore: Send + Sync {
    /// Snapshot of a family; an unknown family is empty at revision 0
    fn load_family(&self, key: &FamilyKey) -> Result<Family, VersionError>;

    fn commit(&self, transaction: Transaction) -> Result<(), VersionError>;
}

/// Template store held in memory, also usable as the resolver's repository
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    families: RwLock<HashMap<FamilyKey, Family>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of every family that has at least one version
    pub fn family_keys(&self) -> Vec<FamilyKey> {
        let mut keys: Vec<FamilyKey> = self
            .families
            .read()
            .values()
            .filter(|f| !f.is_empty())
            .map(|f| f.key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn find<F>(&self, family: &FamilyKey, pick: F) -> Option<TemplateEntity>
    where
        F: Fn(&Family) -> Option<&TemplateEntity>,
    {
        self.families.read().get(family).and_then(pick).cloned()
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn load_family(&self, key: &FamilyKey) -> Result<Family, VersionError> {
        Ok(self
            .families
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Family::empty(key.clone())))
    }

    fn commit(&self, transaction: Transaction) -> Result<(), VersionError> {
        let mut families = self.families.write();

        let mut staged: HashMap<FamilyKey, Family> = HashMap::new();
        for (key, expected) in &transaction.expected {
            let current = families
                .get(key)
                .cloned()
                .unwrap_or_else(|| Family::empty(key.clone()));
            if current.revision != *expected {
                return Err(VersionError::Conflict {
                    family: key.to_string(),
                    expected: *expected,
                    found: current.revision,
                });
            }
            staged.insert(key.clone(), current);
        }

        for (key, op) in transaction.ops {
            let family = staged.get_mut(&key).ok_or_else(|| {
                VersionError::Store(format!("transaction touches {} without a revision", key))
            })?;
            family.apply(op)?;
        }

        for family in staged.values() {
            family.check_invariants()?;
        }

        for (key, mut family) in staged {
            family.revision += 1;
            debug!(family = %key, revision = family.revision, members = family.len(), "committed family");
            families.insert(key, family);
        }
        Ok(())
    }
}

impl TemplateRepository for InMemoryTemplateStore {
    fn get_version(
        &self,
        family: &FamilyKey,
        version: &str,
    ) -> Result<Option<TemplateEntity>, RepositoryError> {
        Ok(self.find(family, |f| f.get(version)))
    }

    fn get_stable(&self, family: &FamilyKey) -> Result<Option<TemplateEntity>, RepositoryError> {
        Ok(self.find(family, Family::stable))
    }

    /// One read lock for the whole batch
    fn get_batch(&self, keys: &[TemplateKey]) -> BatchFetch {
        let families = self.families.read();
        let mut out = BatchFetch::default();
        for key in keys {
            let found = families.get(&key.family()).and_then(|f| match &key.version {
                Some(version) => f.get(version),
                None => f.stable(),
            });
            match found {
                Some(entity) => {
                    out.found.insert(key.clone(), entity.clone());
                }
                None => out.missing.push(key.clone()),
            }
        }
        out
    }
}
