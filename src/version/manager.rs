//! Version lifecycle operations over a [`TemplateStore`]

use std::sync::Arc;

use tracing::{info, warn};

use super::error::VersionError;
use super::family::{Family, FamilyOp};
use super::store::{TemplateStore, Transaction};
use crate::config::VersionConfig;
use crate::template::{FamilyKey, Scope, TemplateEntity};

/// Families before and after a committed transition
#[derive(Debug, Clone)]
pub struct Committed {
    pub before: Vec<Family>,
    pub after: Vec<Family>,
}

/// Plans, validates and commits version transitions
///
/// Each operation loads the families it touches, plans its writes, checks the planned
/// state, and commits against the loaded revisions. If another writer got there first
/// the whole operation is replanned from a fresh snapshot.
pub struct VersionManager {
    store: Arc<dyn TemplateStore>,
    max_retries: usize,
}

impl VersionManager {
    pub fn new(store: Arc<dyn TemplateStore>, config: &VersionConfig) -> Self {
        Self {
            store,
            max_retries: config.max_commit_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    /// Add a version; the family's first version is stable whatever `as_stable` says
    pub fn create(
        &self,
        entity: TemplateEntity,
        as_stable: bool,
    ) -> Result<TemplateEntity, VersionError> {
        let key = entity.family();
        let version = entity.version_label.clone();
        let committed = self.transact(std::slice::from_ref(&key), |families| {
            families[0].plan_create(entity.clone(), as_stable).map(on_first)
        })?;
        let created = member(&committed.after[0], &version)?;
        info!(template = %key, version = %version, stable = created.stable, "created template version");
        Ok(created)
    }

    /// Replace a version's content, making it the last-updated version
    pub fn update_content(&self, entity: TemplateEntity) -> Result<TemplateEntity, VersionError> {
        let key = entity.family();
        let version = entity.version_label.clone();
        let committed = self.transact(std::slice::from_ref(&key), |families| {
            families[0].plan_update(entity.clone()).map(on_first)
        })?;
        info!(template = %key, version = %version, "updated template content");
        member(&committed.after[0], &version)
    }

    /// Make `version` the stable version of its family
    pub fn promote_to_stable(
        &self,
        family: &FamilyKey,
        version: &str,
    ) -> Result<TemplateEntity, VersionError> {
        let committed = self.transact(std::slice::from_ref(family), |families| {
            families[0].plan_promote(version).map(on_first)
        })?;
        info!(template = %family, version = %version, "promoted template version to stable");
        member(&committed.after[0], version)
    }

    /// Delete one version, returning it as it was before deletion
    pub fn delete(&self, family: &FamilyKey, version: &str) -> Result<TemplateEntity, VersionError> {
        let mut removed = self.delete_batch(family, &[version.to_string()])?;
        removed
            .pop()
            .ok_or_else(|| VersionError::not_found(family, version))
    }

    /// Delete several versions in one transition; the stable version goes last
    pub fn delete_batch(
        &self,
        family: &FamilyKey,
        versions: &[String],
    ) -> Result<Vec<TemplateEntity>, VersionError> {
        let committed = self.transact(std::slice::from_ref(family), |families| {
            families[0].plan_delete(versions).map(on_first)
        })?;
        let before = &committed.before[0];
        let after = &committed.after[0];
        let removed: Vec<TemplateEntity> = before
            .members()
            .iter()
            .filter(|m| after.get(&m.version_label).is_none())
            .cloned()
            .collect();
        info!(template = %family, removed = removed.len(), remaining = after.len(), "deleted template versions");
        Ok(removed)
    }

    /// Move a family to another scope, optionally choosing the stable version there
    pub fn rescope(
        &self,
        family: &FamilyKey,
        scope: Scope,
        stable: Option<&str>,
    ) -> Result<Vec<TemplateEntity>, VersionError> {
        let target = FamilyKey::new(scope, family.identifier.clone());
        if target == *family {
            // Staying put still honors the stable choice
            if let Some(version) = stable {
                self.promote_to_stable(family, version)?;
            }
            return Ok(self.store.load_family(family)?.members().to_vec());
        }
        let keys = [family.clone(), target.clone()];
        let committed = self.transact(&keys, |families| {
            let (remove, insert) = families[0].plan_rescope(&families[1], stable)?;
            Ok(remove
                .into_iter()
                .map(|op| (0, op))
                .chain(insert.into_iter().map(|op| (1, op)))
                .collect::<Vec<_>>())
        })?;
        info!(from = %family, to = %target, "rescoped template family");
        Ok(committed.after[1].members().to_vec())
    }

    /// Load, plan, validate and commit, retrying on revision conflicts
    ///
    /// `plan` gets the families in the order of `keys` and returns ops addressed by
    /// position in that list.
    fn transact<P>(&self, keys: &[FamilyKey], plan: P) -> Result<Committed, VersionError>
    where
        P: Fn(&[Family]) -> Result<Vec<(usize, FamilyOp)>, VersionError>,
    {
        let attempts = self.max_retries + 1;
        let mut last_conflict = None;

        for attempt in 1..=attempts {
            let before = keys
                .iter()
                .map(|k| self.store.load_family(k))
                .collect::<Result<Vec<_>, _>>()?;

            let ops = plan(before.as_slice())?;
            if ops.is_empty() {
                return Ok(Committed {
                    after: before.clone(),
                    before,
                });
            }

            let after = before
                .iter()
                .enumerate()
                .map(|(i, family)| {
                    family.planned(
                        ops.iter()
                            .filter(|(target, _)| *target == i)
                            .map(|(_, op)| op.clone()),
                    )
                    .map(|mut next| {
                        next.revision += 1;
                        next
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let transaction = Transaction {
                expected: before.iter().map(|f| (f.key.clone(), f.revision)).collect(),
                ops: ops
                    .into_iter()
                    .map(|(i, op)| (before[i].key.clone(), op))
                    .collect(),
            };
            match self.store.commit(transaction) {
                Ok(()) => return Ok(Committed { before, after }),
                Err(e) if e.is_conflict() => {
                    warn!(attempt, error = %e, "version transition conflicted; retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_conflict.unwrap_or_else(|| VersionError::Store("no commit attempted".into())))
    }
}

/// Address single-family ops to the first family of a transaction
fn on_first(ops: Vec<FamilyOp>) -> Vec<(usize, FamilyOp)> {
    ops.into_iter().map(|op| (0, op)).collect()
}

fn member(family: &Family, version: &str) -> Result<TemplateEntity, VersionError> {
    family
        .get(version)
        .cloned()
        .ok_or_else(|| VersionError::not_found(&family.key, version))
}
