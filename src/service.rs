//! Resolution wrapped with its downstream hooks
//!
//! After a document resolves, every distinct template it used is authorized, the
//! expanded document is validated and run past governance, and finally usage is
//! published. Publishing happens after resolution has succeeded, so its failures are
//! logged and never returned.

use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::template::{
    ResolveOptions, Resolution, Resolver, Scope, TemplateKey, TemplateReferenceSummary,
    TemplateRepository,
};
use crate::tree::Fqp;

/// Decides whether a caller may use a template
pub trait AccessControl: Send + Sync {
    /// `Err` carries the reason for refusal
    fn check(&self, caller: &Scope, template: &TemplateReferenceSummary) -> Result<(), String>;
}

/// Validates an expanded document
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, document: &Value) -> Result<(), SchemaViolation>;
}

/// Where and why an expanded document is invalid
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub fqp: Fqp,
    pub message: String,
}

/// Organisation-wide rules over the expanded document and the templates it used
pub trait GovernancePolicy: Send + Sync {
    fn evaluate(
        &self,
        document: &Value,
        references: &[TemplateReferenceSummary],
    ) -> Result<(), String>;
}

/// Records which templates a caller used
pub trait UsagePublisher: Send + Sync {
    fn publish(&self, caller: &Scope, references: &[TemplateReferenceSummary]) -> Result<(), String>;
}

/// Allows everything; the default for every hook
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn check(&self, _: &Scope, _: &TemplateReferenceSummary) -> Result<(), String> {
        Ok(())
    }
}

impl SchemaValidator for AllowAll {
    fn validate(&self, _: &Value) -> Result<(), SchemaViolation> {
        Ok(())
    }
}

impl GovernancePolicy for AllowAll {
    fn evaluate(&self, _: &Value, _: &[TemplateReferenceSummary]) -> Result<(), String> {
        Ok(())
    }
}

impl UsagePublisher for AllowAll {
    fn publish(&self, _: &Scope, _: &[TemplateReferenceSummary]) -> Result<(), String> {
        Ok(())
    }
}

/// Template resolution plus access control, validation, governance and usage tracking
pub struct TemplateService {
    repository: Arc<dyn TemplateRepository>,
    config: ResolverConfig,
    access: Arc<dyn AccessControl>,
    validator: Arc<dyn SchemaValidator>,
    governance: Arc<dyn GovernancePolicy>,
    usage: Arc<dyn UsagePublisher>,
}

impl TemplateService {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        Self {
            repository,
            config: ResolverConfig::default(),
            access: Arc::new(AllowAll),
            validator: Arc::new(AllowAll),
            governance: Arc::new(AllowAll),
            usage: Arc::new(AllowAll),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_governance(mut self, governance: Arc<dyn GovernancePolicy>) -> Self {
        self.governance = governance;
        self
    }

    pub fn with_usage_publisher(mut self, usage: Arc<dyn UsagePublisher>) -> Self {
        self.usage = usage;
        self
    }

    /// Resolve a document and run it through every hook
    pub fn resolve(
        &self,
        document: Value,
        caller: &Scope,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        let resolver = Resolver::new(self.repository.as_ref(), self.config.clone());
        let resolution = resolver.resolve(document, caller, options)?;

        self.authorize(caller, &resolution.references)?;

        self.validator
            .validate(&resolution.document)
            .map_err(|v| ResolveError::InvalidYamlSchema {
                message: v.message,
                fqp: v.fqp,
            })?;

        self.governance
            .evaluate(&resolution.document, &resolution.references)
            .map_err(|reason| ResolveError::GovernanceDenied { reason })?;

        if !resolution.references.is_empty() {
            if let Err(e) = self.usage.publish(caller, &resolution.references) {
                warn!(error = %e, references = resolution.references.len(), "failed to publish template usage");
            }
        }

        info!(caller = %caller, references = resolution.references.len(), "document resolved");
        Ok(resolution)
    }

    /// Parse YAML (or JSON) text and resolve it
    pub fn resolve_str(
        &self,
        source: &str,
        caller: &Scope,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        let document: Value = serde_yaml::from_str(source)?;
        self.resolve(document, caller, options)
    }

    /// One access check per distinct template version, stopping at the first refusal
    fn authorize(
        &self,
        caller: &Scope,
        references: &[TemplateReferenceSummary],
    ) -> Result<(), ResolveError> {
        let mut checked: Vec<TemplateKey> = Vec::new();
        for summary in references {
            let key = summary.key();
            if checked.contains(&key) {
                continue;
            }
            debug!(template = %key, "checking template access");
            self.access
                .check(caller, summary)
                .map_err(|reason| ResolveError::AccessDenied {
                    template: key.to_string(),
                    reason,
                    fqp: summary.fqp.clone(),
                })?;
            checked.push(key);
        }
        Ok(())
    }
}
