//! Template entities, tenant scopes and identities

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

/// Errors raised while reading a template definition
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Body is not valid YAML
    #[error("template body is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Required field missing from the template body
    #[error("template body is missing required field '{field}'")]
    MissingField { field: String },

    /// `template.type` names no known entity type
    #[error("unknown template type '{name}'")]
    UnknownEntityType { name: String },
}

/// Depth of a tenant scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScopeLevel {
    Account,
    Org,
    Project,
}

/// Tenant scope: an account, optionally narrowed to an organisation and project
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Scope {
    pub fn account(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            org: None,
            project: None,
        }
    }

    pub fn org(account: impl Into<String>, org: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            org: Some(org.into()),
            project: None,
        }
    }

    pub fn project(
        account: impl Into<String>,
        org: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            org: Some(org.into()),
            project: Some(project.into()),
        }
    }

    pub fn level(&self) -> ScopeLevel {
        match (&self.org, &self.project) {
            (Some(_), Some(_)) => ScopeLevel::Project,
            (Some(_), None) => ScopeLevel::Org,
            _ => ScopeLevel::Account,
        }
    }

    /// This scope cut back to a wider level; `None` if `level` is narrower than `self`
    pub fn widen(&self, level: ScopeLevel) -> Option<Scope> {
        if level > self.level() {
            return None;
        }
        Some(match level {
            ScopeLevel::Account => Scope::account(&self.account),
            ScopeLevel::Org => Scope {
                account: self.account.clone(),
                org: self.org.clone(),
                project: None,
            },
            ScopeLevel::Project => self.clone(),
        })
    }

    /// Scope declared by a template body's `orgIdentifier`/`projectIdentifier` fields
    pub fn declared_in(account: &str, body: &Value) -> Scope {
        let template = body.get("template").unwrap_or(body);
        let field = |name: &str| {
            template
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match (field("orgIdentifier"), field("projectIdentifier")) {
            (Some(org), Some(project)) => Scope::project(account, org, project),
            (Some(org), None) => Scope::org(account, org),
            _ => Scope::account(account),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.account)?;
        if let Some(org) = &self.org {
            write!(f, "/{}", org)?;
        }
        if let Some(project) = &self.project {
            write!(f, "/{}", project)?;
        }
        Ok(())
    }
}

/// A template family: every version sharing one identifier within one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyKey {
    pub scope: Scope,
    pub identifier: String,
}

impl FamilyKey {
    pub fn new(scope: Scope, identifier: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
        }
    }

    pub fn version(&self, version: impl Into<String>) -> TemplateKey {
        TemplateKey {
            scope: self.scope.clone(),
            identifier: self.identifier.clone(),
            version: Some(version.into()),
        }
    }

    pub fn stable(&self) -> TemplateKey {
        TemplateKey {
            scope: self.scope.clone(),
            identifier: self.identifier.clone(),
            version: None,
        }
    }
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.identifier)
    }
}

/// Identity of one template version; `version: None` means "whatever is stable"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey {
    pub scope: Scope,
    pub identifier: String,
    pub version: Option<String>,
}

impl TemplateKey {
    pub fn family(&self) -> FamilyKey {
        FamilyKey::new(self.scope.clone(), self.identifier.clone())
    }

    pub fn is_stable_request(&self) -> bool {
        self.version.is_none()
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}:{}@{}", self.scope, self.identifier, v),
            None => write!(f, "{}:{}@<stable>", self.scope, self.identifier),
        }
    }
}

/// Kinds of entity a template can stand for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Pipeline,
    Stage,
    Step,
    StepGroup,
    CustomDeployment,
    MonitoredService,
    SecretManager,
    ArtifactSource,
}

/// Static facts about an entity type
#[derive(Debug)]
pub struct EntityTypeDescriptor {
    /// Spelling in `template.type`
    pub yaml_name: &'static str,
    /// Field a referencing object sits under in a consuming document
    pub field: &'static str,
    /// Whether `spec.type` carries a child type discriminator
    pub has_child_type: bool,
}

static DESCRIPTORS: [EntityTypeDescriptor; 8] = [
    EntityTypeDescriptor {
        yaml_name: "Pipeline",
        field: "pipeline",
        has_child_type: false,
    },
    EntityTypeDescriptor {
        yaml_name: "Stage",
        field: "stage",
        has_child_type: true,
    },
    EntityTypeDescriptor {
        yaml_name: "Step",
        field: "step",
        has_child_type: true,
    },
    EntityTypeDescriptor {
        yaml_name: "StepGroup",
        field: "stepGroup",
        has_child_type: false,
    },
    EntityTypeDescriptor {
        yaml_name: "CustomDeployment",
        field: "customDeployment",
        has_child_type: false,
    },
    EntityTypeDescriptor {
        yaml_name: "MonitoredService",
        field: "monitoredService",
        has_child_type: true,
    },
    EntityTypeDescriptor {
        yaml_name: "SecretManager",
        field: "secretManager",
        has_child_type: true,
    },
    EntityTypeDescriptor {
        yaml_name: "ArtifactSource",
        field: "artifactSource",
        has_child_type: true,
    },
];

impl EntityType {
    pub const ALL: [EntityType; 8] = [
        EntityType::Pipeline,
        EntityType::Stage,
        EntityType::Step,
        EntityType::StepGroup,
        EntityType::CustomDeployment,
        EntityType::MonitoredService,
        EntityType::SecretManager,
        EntityType::ArtifactSource,
    ];

    pub fn descriptor(self) -> &'static EntityTypeDescriptor {
        &DESCRIPTORS[self as usize]
    }

    pub fn from_yaml_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.descriptor().yaml_name.eq_ignore_ascii_case(name))
    }

    /// Entity type whose referencing objects sit under `field`
    pub fn from_field(field: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.descriptor().field == field)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().yaml_name)
    }
}

/// One stored version of a template
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEntity {
    pub scope: Scope,
    pub identifier: String,
    pub version_label: String,
    pub name: String,
    pub entity_type: EntityType,
    /// Child type discriminator (`spec.type`), fixed for the family once set
    pub child_type: Option<String>,
    /// Full stored body, including the `template:` wrapper
    pub body: Value,
    pub stable: bool,
    pub last_updated: bool,
    /// Capability tags declared by the template
    pub modules: Vec<String>,
    /// Where the body came from (file path, remote ref); opaque to resolution
    pub source: Option<String>,
}

impl TemplateEntity {
    /// Build an entity from YAML text
    pub fn from_yaml(scope: Scope, yaml: &str) -> Result<Self, TemplateError> {
        let body: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(scope, body)
    }

    /// Build an entity from a parsed body of the form `template: { ... }`
    pub fn from_value(scope: Scope, body: Value) -> Result<Self, TemplateError> {
        let template = body.get("template").ok_or_else(|| missing("template"))?;
        let text = |name: &str| template.get(name).and_then(Value::as_str).map(str::to_string);

        let identifier = text("identifier").ok_or_else(|| missing("template.identifier"))?;
        let version_label =
            text("versionLabel").ok_or_else(|| missing("template.versionLabel"))?;
        let type_name = text("type").ok_or_else(|| missing("template.type"))?;
        let entity_type = EntityType::from_yaml_name(&type_name)
            .ok_or(TemplateError::UnknownEntityType { name: type_name })?;

        if template.get("spec").is_none() {
            return Err(missing("template.spec"));
        }

        let child_type = if entity_type.descriptor().has_child_type {
            template
                .get("spec")
                .and_then(|s| s.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        let modules = template
            .get("modules")
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scope,
            name: text("name").unwrap_or_else(|| identifier.clone()),
            identifier,
            version_label,
            entity_type,
            child_type,
            body,
            stable: false,
            last_updated: false,
            modules,
            source: None,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The identity of this exact version
    pub fn key(&self) -> TemplateKey {
        self.family().version(self.version_label.clone())
    }

    pub fn family(&self) -> FamilyKey {
        FamilyKey::new(self.scope.clone(), self.identifier.clone())
    }

    /// The `spec` skeleton that gets spliced into referencing documents
    pub fn skeleton(&self) -> Option<&Value> {
        self.body.get("template").and_then(|t| t.get("spec"))
    }
}

fn missing(field: &str) -> TemplateError {
    TemplateError::MissingField {
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGE: &str = r#"
template:
  name: Deploy
  identifier: deploy
  versionLabel: v1
  type: Stage
  modules: [cd]
  spec:
    type: Deployment
    spec:
      env: <+input>
"#;

    #[test]
    fn test_from_yaml() {
        let entity = TemplateEntity::from_yaml(Scope::account("acc"), STAGE).expect("Should parse");
        assert_eq!(entity.identifier, "deploy");
        assert_eq!(entity.version_label, "v1");
        assert_eq!(entity.name, "Deploy");
        assert_eq!(entity.entity_type, EntityType::Stage);
        assert_eq!(entity.child_type.as_deref(), Some("Deployment"));
        assert_eq!(entity.modules, vec!["cd".to_string()]);
        assert!(entity.skeleton().unwrap().get("spec").is_some());
        assert!(!entity.stable);
    }

    #[test]
    fn test_missing_field() {
        let result = TemplateEntity::from_yaml(
            Scope::account("acc"),
            "template:\n  identifier: x\n  type: Stage\n  spec: {}\n",
        );
        assert!(matches!(
            result,
            Err(TemplateError::MissingField { field }) if field == "template.versionLabel"
        ));
    }

    #[test]
    fn test_unknown_type() {
        let result = TemplateEntity::from_yaml(
            Scope::account("acc"),
            "template:\n  identifier: x\n  versionLabel: v1\n  type: Widget\n  spec: {}\n",
        );
        assert!(matches!(result, Err(TemplateError::UnknownEntityType { .. })));
    }

    #[test]
    fn test_descriptor_table_matches_variants() {
        for t in EntityType::ALL {
            assert_eq!(EntityType::from_yaml_name(t.descriptor().yaml_name), Some(t));
            assert_eq!(EntityType::from_field(t.descriptor().field), Some(t));
        }
        assert_eq!(EntityType::from_yaml_name("stepgroup"), Some(EntityType::StepGroup));
        assert!(!EntityType::Pipeline.descriptor().has_child_type);
    }

    #[test]
    fn test_scope_widen() {
        let project = Scope::project("acc", "org", "proj");
        assert_eq!(project.level(), ScopeLevel::Project);
        assert_eq!(project.widen(ScopeLevel::Org), Some(Scope::org("acc", "org")));
        assert_eq!(project.widen(ScopeLevel::Account), Some(Scope::account("acc")));
        assert_eq!(Scope::account("acc").widen(ScopeLevel::Org), None);
    }

    #[test]
    fn test_declared_scope() {
        let body: Value = serde_yaml::from_str(
            "template:\n  orgIdentifier: o\n  projectIdentifier: p\n  identifier: x\n",
        )
        .unwrap();
        assert_eq!(Scope::declared_in("acc", &body), Scope::project("acc", "o", "p"));
        assert_eq!(
            Scope::declared_in("acc", &Value::Null),
            Scope::account("acc")
        );
    }

    #[test]
    fn test_key_display() {
        let family = FamilyKey::new(Scope::org("acc", "org"), "deploy");
        assert_eq!(family.version("v2").to_string(), "acc/org:deploy@v2");
        assert_eq!(family.stable().to_string(), "acc/org:deploy@<stable>");
    }
}
