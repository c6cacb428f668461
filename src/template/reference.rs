//! Template reference nodes and the summaries reported for them
//!
//! A reference looks like this inside a consuming document:
//!
//! ```yaml
//! stage:
//!   identifier: deploy_prod
//!   template:
//!     templateRef: org.deploy
//!     versionLabel: v2
//!     templateInputs:
//!       spec:
//!         env: prod
//! ```
//!
//! The object carrying the marker field (`stage` above) is the referencing object; the
//! mapping under the marker is the reference node.

use serde::Serialize;
use serde_yaml::{Mapping, Value};

use super::entity::{Scope, ScopeLevel, TemplateEntity, TemplateKey};
use crate::error::ResolveError;
use crate::tree::{compute_paths, Fqp};

pub const TEMPLATE_REF: &str = "templateRef";
pub const VERSION_LABEL: &str = "versionLabel";
pub const TEMPLATE_INPUTS: &str = "templateInputs";

const ACCOUNT_PREFIX: &str = "account.";
const ORG_PREFIX: &str = "org.";

/// A reference node found in a document
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateReference {
    /// Path of the reference node itself
    pub fqp: Fqp,
    /// Identifier with any scope prefix removed
    pub identifier: String,
    /// Explicit version label; `None` resolves to the stable version
    pub requested_version: Option<String>,
    /// Scope the identifier resolves in
    pub scope: Scope,
    /// Supplied inputs subtree
    pub inputs: Option<Value>,
}

impl TemplateReference {
    /// Read a reference node, resolving its scope prefix against the enclosing scope
    pub fn parse(node: &Value, fqp: Fqp, enclosing: &Scope) -> Result<Self, ResolveError> {
        let Some(map) = node.as_mapping() else {
            return Err(ResolveError::invalid_reference(
                "reference node is not a mapping",
                fqp,
            ));
        };

        let raw = match map.get(TEMPLATE_REF) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim(),
            _ => {
                return Err(ResolveError::invalid_reference(
                    "templateRef must be a non-empty string",
                    fqp,
                ))
            }
        };

        let (level, identifier) = if let Some(rest) = raw.strip_prefix(ACCOUNT_PREFIX) {
            (Some(ScopeLevel::Account), rest)
        } else if let Some(rest) = raw.strip_prefix(ORG_PREFIX) {
            (Some(ScopeLevel::Org), rest)
        } else {
            (None, raw)
        };
        if identifier.is_empty() {
            return Err(ResolveError::invalid_reference(
                format!("templateRef '{}' has no identifier", raw),
                fqp,
            ));
        }

        let scope = match level {
            None => enclosing.clone(),
            Some(level) => enclosing.widen(level).ok_or_else(|| {
                ResolveError::invalid_reference(
                    format!(
                        "'{}' reaches outside the enclosing scope '{}'",
                        raw, enclosing
                    ),
                    fqp.clone(),
                )
            })?,
        };

        let requested_version = match map.get(VERSION_LABEL) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(_) => {
                return Err(ResolveError::invalid_reference(
                    "versionLabel must be a string",
                    fqp,
                ))
            }
        };

        Ok(Self {
            identifier: identifier.to_string(),
            requested_version,
            scope,
            inputs: map.get(TEMPLATE_INPUTS).filter(|v| !v.is_null()).cloned(),
            fqp,
        })
    }

    /// Identity to fetch: explicit version, or the family's stable version
    pub fn key(&self) -> TemplateKey {
        TemplateKey {
            scope: self.scope.clone(),
            identifier: self.identifier.clone(),
            version: self.requested_version.clone(),
        }
    }

    /// Path of the referencing object
    pub fn referencing_fqp(&self) -> Fqp {
        self.fqp.parent().unwrap_or_default()
    }

    /// Summarize this reference once it resolved to `entity`
    pub fn summarize(&self, entity: &TemplateEntity) -> TemplateReferenceSummary {
        TemplateReferenceSummary {
            fqp: self.referencing_fqp(),
            identifier: self.identifier.clone(),
            version_label: entity.version_label.clone(),
            scope: entity.scope.clone(),
            modules: entity.modules.clone(),
            stable_resolution: self.requested_version.is_none(),
        }
    }
}

/// A template actually used during one resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateReferenceSummary {
    /// Path of the referencing object in the expanded document
    pub fqp: Fqp,
    pub identifier: String,
    /// Version the reference resolved to
    pub version_label: String,
    pub scope: Scope,
    /// Capability tags declared by the resolved template
    pub modules: Vec<String>,
    /// True when the reference omitted its version label
    pub stable_resolution: bool,
}

impl TemplateReferenceSummary {
    pub fn key(&self) -> TemplateKey {
        TemplateKey {
            scope: self.scope.clone(),
            identifier: self.identifier.clone(),
            version: Some(self.version_label.clone()),
        }
    }
}

/// Whether a mapping carries a reference under `marker`
pub fn is_referencing_object(map: &Mapping, marker: &str) -> bool {
    map.get(marker)
        .and_then(Value::as_mapping)
        .map(|node| node.contains_key(TEMPLATE_REF))
        .unwrap_or(false)
}

/// Every reference node in a tree, in document pre-order
pub fn reference_nodes<'a>(tree: &'a Value, marker: &str) -> Vec<(Fqp, &'a Value)> {
    compute_paths(tree)
        .iter()
        .filter_map(|(path, value)| {
            let map = value.as_mapping()?;
            if !is_referencing_object(map, marker) {
                return None;
            }
            Some((path.child(marker), map.get(marker)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn project() -> Scope {
        Scope::project("acc", "org", "proj")
    }

    #[test]
    fn test_parse_full_reference() {
        let node = yaml("templateRef: deploy\nversionLabel: v2\ntemplateInputs:\n  env: prod\n");
        let r = TemplateReference::parse(&node, "stage.template".parse().unwrap(), &project())
            .unwrap();
        assert_eq!(r.identifier, "deploy");
        assert_eq!(r.requested_version.as_deref(), Some("v2"));
        assert_eq!(r.scope, project());
        assert_eq!(r.inputs, Some(yaml("env: prod")));
        assert_eq!(r.referencing_fqp().to_string(), "stage");
    }

    #[test]
    fn test_scope_prefixes() {
        let node = yaml("templateRef: account.shared");
        let r = TemplateReference::parse(&node, Fqp::root(), &project()).unwrap();
        assert_eq!(r.identifier, "shared");
        assert_eq!(r.scope, Scope::account("acc"));

        let node = yaml("templateRef: org.shared");
        let r = TemplateReference::parse(&node, Fqp::root(), &project()).unwrap();
        assert_eq!(r.scope, Scope::org("acc", "org"));

        let err = TemplateReference::parse(&node, Fqp::root(), &Scope::account("acc"));
        assert!(matches!(
            err,
            Err(ResolveError::InvalidTemplateReference { .. })
        ));
    }

    #[test]
    fn test_empty_version_means_stable() {
        let node = yaml("templateRef: deploy\nversionLabel: ''\n");
        let r = TemplateReference::parse(&node, Fqp::root(), &project()).unwrap();
        assert!(r.key().is_stable_request());
    }

    #[test]
    fn test_missing_template_ref() {
        let node = yaml("versionLabel: v1");
        let err = TemplateReference::parse(&node, "a.template".parse().unwrap(), &project())
            .unwrap_err();
        assert_eq!(err.fqp().unwrap().to_string(), "a.template");
    }

    #[test]
    fn test_reference_nodes_in_order() {
        let doc = yaml(
            r#"
pipeline:
  template:
    templateRef: pipe
  stages:
    - stage:
        template:
          templateRef: a
    - stage:
        identifier: plain
        template: not-a-reference
    - stage:
        template:
          templateRef: b
"#,
        );
        let found: Vec<String> = reference_nodes(&doc, "template")
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(
            found,
            vec![
                "pipeline.template",
                "pipeline.stages[0].stage.template",
                "pipeline.stages[2].stage.template",
            ]
        );
    }
}
