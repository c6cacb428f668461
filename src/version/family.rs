//! Template families and the transitions planned against them
//!
//! Every transition is planned as an ordered list of [`FamilyOp`]s against a snapshot of
//! the family. Individual ops may pass through states that break the flag invariants;
//! only the state after the whole list is checked, and only that state is ever stored.

use serde_yaml::Value;

use super::error::VersionError;
use crate::template::{FamilyKey, Scope, TemplateEntity};

/// One write against a family
#[derive(Debug, Clone, PartialEq)]
pub enum FamilyOp {
    Insert(TemplateEntity),
    /// Replace a version's content (flags included)
    Replace(TemplateEntity),
    SetStable { version: String, stable: bool },
    SetLastUpdated { version: String, last_updated: bool },
    Remove { version: String },
}

/// All stored versions of one template, with a revision bumped on every commit
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub key: FamilyKey,
    pub revision: u64,
    members: Vec<TemplateEntity>,
}

impl Family {
    pub fn empty(key: FamilyKey) -> Self {
        Self {
            key,
            revision: 0,
            members: Vec::new(),
        }
    }

    pub fn members(&self) -> &[TemplateEntity] {
        &self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn get(&self, version: &str) -> Option<&TemplateEntity> {
        self.members.iter().find(|m| m.version_label == version)
    }

    pub fn stable(&self) -> Option<&TemplateEntity> {
        self.members.iter().find(|m| m.stable)
    }

    pub fn last_updated(&self) -> Option<&TemplateEntity> {
        self.members.iter().find(|m| m.last_updated)
    }

    /// Apply one op in place
    pub fn apply(&mut self, op: FamilyOp) -> Result<(), VersionError> {
        match op {
            FamilyOp::Insert(entity) => {
                if self.get(&entity.version_label).is_some() {
                    return Err(VersionError::already_exists(&self.key, entity.version_label));
                }
                self.members.push(entity);
            }
            FamilyOp::Replace(entity) => {
                let slot = self.member_mut(&entity.version_label)?;
                *slot = entity;
            }
            FamilyOp::SetStable { version, stable } => {
                self.member_mut(&version)?.stable = stable;
            }
            FamilyOp::SetLastUpdated {
                version,
                last_updated,
            } => {
                self.member_mut(&version)?.last_updated = last_updated;
            }
            FamilyOp::Remove { version } => {
                let before = self.members.len();
                self.members.retain(|m| m.version_label != version);
                if self.members.len() == before {
                    return Err(VersionError::not_found(&self.key, version));
                }
            }
        }
        Ok(())
    }

    /// The family as it would be after `ops`, checked against the invariants
    pub fn planned(&self, ops: impl IntoIterator<Item = FamilyOp>) -> Result<Family, VersionError> {
        let mut next = self.clone();
        for op in ops {
            next.apply(op)?;
        }
        next.check_invariants()?;
        Ok(next)
    }

    /// Exactly one stable and one last-updated member, and a single type, unless empty
    pub fn check_invariants(&self) -> Result<(), VersionError> {
        if self.members.is_empty() {
            return Ok(());
        }

        let stable = self.members.iter().filter(|m| m.stable).count();
        if stable != 1 {
            return Err(VersionError::invariant(
                &self.key,
                format!("{} stable versions", stable),
            ));
        }
        let last_updated = self.members.iter().filter(|m| m.last_updated).count();
        if last_updated != 1 {
            return Err(VersionError::invariant(
                &self.key,
                format!("{} last-updated versions", last_updated),
            ));
        }

        let first = &self.members[0];
        let child_type = self.members.iter().find_map(|m| m.child_type.as_deref());
        for member in &self.members {
            self.check_type(member, first, child_type)?;
        }
        Ok(())
    }

    fn check_type(
        &self,
        entity: &TemplateEntity,
        reference: &TemplateEntity,
        child_type: Option<&str>,
    ) -> Result<(), VersionError> {
        if entity.entity_type != reference.entity_type {
            return Err(VersionError::entity_type_mismatch(
                &self.key,
                reference.entity_type,
                entity.entity_type,
            ));
        }
        match (child_type, entity.child_type.as_deref()) {
            (Some(expected), Some(found)) if expected != found => Err(
                VersionError::child_type_mismatch(&self.key, expected, Some(found)),
            ),
            _ => Ok(()),
        }
    }

    /// Check a candidate version against the family's fixed types
    ///
    /// Once a family has a child type, new versions of types that carry one must declare it.
    fn check_candidate(&self, entity: &TemplateEntity) -> Result<(), VersionError> {
        let Some(first) = self.members.first() else {
            return Ok(());
        };
        let child_type = self.members.iter().find_map(|m| m.child_type.as_deref());
        self.check_type(entity, first, child_type)?;
        match (child_type, entity.child_type.as_deref()) {
            (Some(expected), None) if entity.entity_type.descriptor().has_child_type => Err(
                VersionError::child_type_mismatch(&self.key, expected, None),
            ),
            _ => Ok(()),
        }
    }

    fn member_mut(&mut self, version: &str) -> Result<&mut TemplateEntity, VersionError> {
        let key = &self.key;
        self.members
            .iter_mut()
            .find(|m| m.version_label == version)
            .ok_or_else(|| VersionError::not_found(key, version))
    }

    fn require(&self, version: &str) -> Result<&TemplateEntity, VersionError> {
        self.get(version)
            .ok_or_else(|| VersionError::not_found(&self.key, version))
    }

    /// Add a new version; the first version of a family is always stable
    pub fn plan_create(
        &self,
        mut entity: TemplateEntity,
        as_stable: bool,
    ) -> Result<Vec<FamilyOp>, VersionError> {
        if self.get(&entity.version_label).is_some() {
            return Err(VersionError::already_exists(&self.key, entity.version_label));
        }
        self.check_candidate(&entity)?;

        let mut ops = Vec::new();
        if self.is_empty() {
            entity.stable = true;
        } else {
            if as_stable {
                if let Some(current) = self.stable() {
                    ops.push(FamilyOp::SetStable {
                        version: current.version_label.clone(),
                        stable: false,
                    });
                }
            }
            if let Some(current) = self.last_updated() {
                ops.push(FamilyOp::SetLastUpdated {
                    version: current.version_label.clone(),
                    last_updated: false,
                });
            }
            entity.stable = as_stable;
        }
        entity.last_updated = true;
        ops.push(FamilyOp::Insert(entity));
        Ok(ops)
    }

    /// Replace a version's content; it becomes last-updated and keeps its stable flag
    pub fn plan_update(&self, mut entity: TemplateEntity) -> Result<Vec<FamilyOp>, VersionError> {
        let existing = self.require(&entity.version_label)?;
        self.check_candidate(&entity)?;

        let mut ops = Vec::new();
        if let Some(current) = self.last_updated() {
            if current.version_label != entity.version_label {
                ops.push(FamilyOp::SetLastUpdated {
                    version: current.version_label.clone(),
                    last_updated: false,
                });
            }
        }
        entity.stable = existing.stable;
        entity.last_updated = true;
        ops.push(FamilyOp::Replace(entity));
        Ok(ops)
    }

    /// Make `version` stable and last-updated; nothing to do if it already is stable
    pub fn plan_promote(&self, version: &str) -> Result<Vec<FamilyOp>, VersionError> {
        let target = self.require(version)?;
        if target.stable {
            return Ok(Vec::new());
        }

        let mut ops = Vec::new();
        if let Some(current) = self.stable() {
            ops.push(FamilyOp::SetStable {
                version: current.version_label.clone(),
                stable: false,
            });
        }
        ops.push(FamilyOp::SetStable {
            version: version.to_string(),
            stable: true,
        });
        if let Some(current) = self.last_updated() {
            if current.version_label != version {
                ops.push(FamilyOp::SetLastUpdated {
                    version: current.version_label.clone(),
                    last_updated: false,
                });
            }
        }
        if !target.last_updated {
            ops.push(FamilyOp::SetLastUpdated {
                version: version.to_string(),
                last_updated: true,
            });
        }
        Ok(ops)
    }

    /// Remove versions
    ///
    /// The stable version may only go when every other version goes with it, and is then
    /// removed last. Removing the last-updated version hands that flag to the stable one.
    pub fn plan_delete(&self, versions: &[String]) -> Result<Vec<FamilyOp>, VersionError> {
        let mut doomed: Vec<&TemplateEntity> = Vec::new();
        for version in versions {
            let member = self.require(version)?;
            if !doomed.iter().any(|d| d.version_label == member.version_label) {
                doomed.push(member);
            }
        }

        let remaining = self.members.len() - doomed.len();
        if let Some(stable) = doomed.iter().find(|d| d.stable) {
            if remaining > 0 {
                return Err(VersionError::invariant(
                    &self.key,
                    format!(
                        "cannot delete stable version {} while {} other version(s) remain",
                        stable.version_label, remaining
                    ),
                ));
            }
        }

        let mut ops: Vec<FamilyOp> = doomed
            .iter()
            .filter(|d| !d.stable)
            .map(|d| FamilyOp::Remove {
                version: d.version_label.clone(),
            })
            .collect();

        if remaining > 0 {
            if doomed.iter().any(|d| d.last_updated) {
                if let Some(stable) = self.stable() {
                    ops.push(FamilyOp::SetLastUpdated {
                        version: stable.version_label.clone(),
                        last_updated: true,
                    });
                }
            }
        } else if let Some(stable) = self.stable() {
            ops.push(FamilyOp::Remove {
                version: stable.version_label.clone(),
            });
        }
        Ok(ops)
    }

    /// Move every version into `target`, optionally choosing the stable version there
    ///
    /// Returns the ops for this family and for `target`, which must be empty.
    pub fn plan_rescope(
        &self,
        target: &Family,
        stable: Option<&str>,
    ) -> Result<(Vec<FamilyOp>, Vec<FamilyOp>), VersionError> {
        if let Some(clash) = target.members.first() {
            return Err(VersionError::already_exists(&target.key, clash.version_label.clone()));
        }
        if self.is_empty() {
            return Err(VersionError::not_found(&self.key, "<any>"));
        }

        let mut moved = Family::empty(target.key.clone());
        moved.members = self
            .members
            .iter()
            .map(|m| rescoped(m, &target.key.scope))
            .collect();

        let remove = self
            .members
            .iter()
            .map(|m| FamilyOp::Remove {
                version: m.version_label.clone(),
            })
            .collect();
        let promote = match stable {
            Some(version) => moved.plan_promote(version)?,
            None => Vec::new(),
        };
        let mut insert: Vec<FamilyOp> = moved.members.into_iter().map(FamilyOp::Insert).collect();
        insert.extend(promote);
        Ok((remove, insert))
    }
}

/// A copy of `entity` living in `scope`, with the body's scope fields rewritten
fn rescoped(entity: &TemplateEntity, scope: &Scope) -> TemplateEntity {
    let mut moved = entity.clone();
    moved.scope = scope.clone();
    if let Some(Value::Mapping(template)) = moved.body.get_mut("template") {
        for (field, value) in [("orgIdentifier", &scope.org), ("projectIdentifier", &scope.project)] {
            match value {
                Some(v) => {
                    template.insert(Value::from(field), Value::from(v.as_str()));
                }
                None => {
                    template.remove(field);
                }
            }
        }
    }
    moved
}
