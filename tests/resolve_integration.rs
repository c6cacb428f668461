//! Integration tests for template reference resolution

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use serde_yaml::{Mapping, Value};

use template_resolver::template::{reference_nodes, BatchFetch, RepositoryError};
use template_resolver::{
    resolve, FamilyKey, InMemoryTemplateStore, ResolveError, ResolveOptions, Resolver,
    ResolverConfig, Scope, TemplateEntity, TemplateKey, TemplateRepository, TemplateService,
    VersionConfig, VersionManager,
};

fn yaml(s: &str) -> Value {
    serde_yaml::from_str(s).expect("test YAML should parse")
}

fn template(scope: Scope, id: &str, version: &str, entity_type: &str, spec: &str) -> TemplateEntity {
    let mut template = Mapping::new();
    template.insert("identifier".into(), id.into());
    template.insert("versionLabel".into(), version.into());
    template.insert("type".into(), entity_type.into());
    template.insert("spec".into(), yaml(spec));
    let mut body = Mapping::new();
    body.insert("template".into(), Value::Mapping(template));
    TemplateEntity::from_value(scope, Value::Mapping(body)).expect("test template should load")
}

struct Fixture {
    store: Arc<InMemoryTemplateStore>,
    versions: VersionManager,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(InMemoryTemplateStore::new());
        let versions = VersionManager::new(store.clone(), &VersionConfig::default());
        Self { store, versions }
    }

    fn add(&self, entity: TemplateEntity, stable: bool) -> &Self {
        self.versions.create(entity, stable).expect("create should succeed");
        self
    }

    fn resolve(&self, doc: &str) -> Result<template_resolver::Resolution, ResolveError> {
        resolve(self.store.as_ref(), doc, &Scope::account("acc"))
    }
}

fn acc() -> Scope {
    Scope::account("acc")
}

/// T stable at v2 with a placeholder at `spec.env` and a pinned reference to U v1
fn end_to_end_fixture() -> Fixture {
    let fx = Fixture::new();
    fx.add(
        template(acc(), "svc", "v1", "Stage", "env: <+input>\nold: true\n"),
        false,
    )
    .add(
        template(
            acc(),
            "svc",
            "v2",
            "Stage",
            r#"
env: <+input>
deploy:
  template:
    templateRef: rollout
    versionLabel: v1
"#,
        ),
        true,
    )
    .add(
        template(acc(), "rollout", "v1", "Step", "type: Rollout\nspec:\n  strategy: canary\n"),
        false,
    )
    .add(
        template(acc(), "rollout", "v2", "Step", "type: Rollout\nspec:\n  strategy: blue-green\n"),
        true,
    );
    fx
}

#[test]
fn test_end_to_end_stable_and_pinned() {
    let fx = end_to_end_fixture();
    let out = fx
        .resolve(
            r#"
spec:
  template:
    templateRef: svc
    templateInputs:
      env: prod
"#,
        )
        .expect("Should resolve");

    assert_eq!(
        out.document,
        yaml(
            r#"
spec:
  env: prod
  deploy:
    type: Rollout
    spec:
      strategy: canary
"#
        )
    );

    let summary: Vec<(String, String, String, bool)> = out
        .references
        .iter()
        .map(|r| {
            (
                r.fqp.to_string(),
                r.identifier.clone(),
                r.version_label.clone(),
                r.stable_resolution,
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("spec".to_string(), "svc".to_string(), "v2".to_string(), true),
            ("spec.deploy".to_string(), "rollout".to_string(), "v1".to_string(), false),
        ]
    );
}

#[test]
fn test_summary_paths_snapshot() {
    let fx = end_to_end_fixture();
    let out = fx
        .resolve(
            r#"
stages:
  - spec:
      template:
        templateRef: svc
  - spec:
      name: plain
"#,
        )
        .unwrap();
    let paths: Vec<String> = out.references.iter().map(|r| r.fqp.to_string()).collect();
    insta::assert_snapshot!(paths.join(" | "), @"stages[0].spec | stages[0].spec.deploy");
    // Unfilled placeholder stays a runtime input of the expanded document
    assert_eq!(out.document["stages"][0]["spec"]["env"], yaml("<+input>"));
}

#[test]
fn test_document_without_references_is_unchanged() {
    let fx = end_to_end_fixture();
    let source = r#"
pipeline:
  name: plain
  stages:
    - stage:
        identifier: build
        template: not-a-reference
"#;
    let out = fx.resolve(source).unwrap();
    assert_eq!(out.document, yaml(source));
    assert!(out.references.is_empty());
}

#[test]
fn test_output_has_no_reference_nodes() {
    let fx = end_to_end_fixture();
    let out = fx
        .resolve(
            r#"
a:
  template:
    templateRef: svc
b:
  - c:
      template:
        templateRef: rollout
"#,
        )
        .unwrap();
    assert!(reference_nodes(&out.document, "template").is_empty());
    assert_eq!(out.references.len(), 3);
}

#[test]
fn test_cycle_between_two_templates() {
    let fx = Fixture::new();
    fx.add(
        template(
            acc(),
            "a",
            "v1",
            "StepGroup",
            "steps:\n  - step:\n      template:\n        templateRef: b\n",
        ),
        true,
    )
    .add(
        template(
            acc(),
            "b",
            "v1",
            "Step",
            "type: Group\nnested:\n  template:\n    templateRef: a\n",
        ),
        true,
    );

    let err = fx
        .resolve("stepGroup:\n  template:\n    templateRef: a\n")
        .unwrap_err();
    match err {
        ResolveError::CyclicTemplateReference { chain, fqp } => {
            assert_eq!(chain, "acc:a@v1 -> acc:b@v1 -> acc:a@v1");
            assert_eq!(fqp.to_string(), "stepGroup.steps[0].step.nested.template");
        }
        other => panic!("Expected CyclicTemplateReference, got {:?}", other),
    }
}

fn chain_fixture(length: usize) -> Fixture {
    let fx = Fixture::new();
    for i in 0..length {
        let spec = if i + 1 < length {
            format!("level: {}\nnext:\n  template:\n    templateRef: l{}\n", i, i + 1)
        } else {
            format!("level: {}\n", i)
        };
        fx.add(template(acc(), &format!("l{}", i), "v1", "Pipeline", &spec), true);
    }
    fx
}

#[test]
fn test_depth_limit() {
    let fx = chain_fixture(6);
    let doc = yaml("root:\n  template:\n    templateRef: l0\n");

    let deep_enough = Resolver::new(fx.store.as_ref(), ResolverConfig::default())
        .resolve(doc.clone(), &acc(), &ResolveOptions::default())
        .unwrap();
    assert_eq!(
        deep_enough.document["root"]["next"]["next"]["next"]["next"]["next"]["level"],
        yaml("5")
    );

    let err = Resolver::new(
        fx.store.as_ref(),
        ResolverConfig::default().with_max_depth(3),
    )
    .resolve(doc, &acc(), &ResolveOptions::default())
    .unwrap_err();
    match err {
        ResolveError::RecursionLimitExceeded { limit, fqp } => {
            assert_eq!(limit, 3);
            assert_eq!(fqp.to_string(), "root.next.next.next.template");
        }
        other => panic!("Expected RecursionLimitExceeded, got {:?}", other),
    }
}

#[test]
fn test_missing_template_reports_path() {
    let fx = end_to_end_fixture();
    let err = fx
        .resolve(
            r#"
stages:
  - stage:
      template:
        templateRef: svc
        versionLabel: v9
"#,
        )
        .unwrap_err();
    match err {
        ResolveError::TemplateNotFound {
            identifier,
            version,
            fqp,
        } => {
            assert_eq!(identifier, "svc");
            assert_eq!(version.as_deref(), Some("v9"));
            assert_eq!(fqp.to_string(), "stages[0].stage.template");
        }
        other => panic!("Expected TemplateNotFound, got {:?}", other),
    }
}

#[test]
fn test_stable_drift_between_calls() {
    let fx = end_to_end_fixture();
    let doc = "step:\n  template:\n    templateRef: rollout\n";

    let first = fx.resolve(doc).unwrap();
    assert_eq!(first.document["step"]["spec"]["strategy"], yaml("blue-green"));

    fx.versions
        .promote_to_stable(&FamilyKey::new(acc(), "rollout"), "v1")
        .unwrap();

    let second = fx.resolve(doc).unwrap();
    assert_eq!(second.document["step"]["spec"]["strategy"], yaml("canary"));
    assert_eq!(second.references[0].version_label, "v1");
    assert!(second.references[0].stable_resolution);
}

#[test]
fn test_scope_prefixes() {
    let project = Scope::project("acc", "org", "proj");
    let fx = Fixture::new();
    fx.add(template(acc(), "shared", "v1", "Step", "origin: account\n"), true)
        .add(
            template(Scope::org("acc", "org"), "shared", "v1", "Step", "origin: org\n"),
            true,
        )
        .add(template(project.clone(), "shared", "v1", "Step", "origin: project\n"), true);

    let out = Resolver::new(fx.store.as_ref(), ResolverConfig::default())
        .resolve(
            yaml(
                r#"
steps:
  - step:
      template:
        templateRef: shared
  - step:
      template:
        templateRef: org.shared
  - step:
      template:
        templateRef: account.shared
"#,
            ),
            &project,
            &ResolveOptions::default(),
        )
        .unwrap();

    let origins: Vec<&str> = (0..3usize)
        .map(|i| out.document["steps"][i]["step"]["origin"].as_str().unwrap())
        .collect();
    assert_eq!(origins, vec!["project", "org", "account"]);
    assert_eq!(out.references[2].scope, acc());
}

#[test]
fn test_named_list_inputs() {
    let fx = Fixture::new();
    fx.add(
        template(
            acc(),
            "build",
            "v1",
            "StepGroup",
            r#"
steps:
  - step:
      identifier: compile
      command: <+input>
  - step:
      identifier: test
      command: <+input>.default(cargo test)
"#,
        ),
        true,
    );

    let out = fx
        .resolve(
            r#"
stepGroup:
  template:
    templateRef: build
    templateInputs:
      steps:
        - step:
            identifier: test
            command: cargo nextest run
        - step:
            identifier: compile
            command: cargo build
        - step:
            identifier: lint
            command: cargo clippy
"#,
        )
        .unwrap();

    assert_eq!(
        out.document,
        yaml(
            r#"
stepGroup:
  steps:
    - step:
        identifier: compile
        command: cargo build
    - step:
        identifier: test
        command: cargo nextest run
    - step:
        identifier: lint
        command: cargo clippy
"#
        )
    );

    let err = fx
        .resolve(
            r#"
stepGroup:
  template:
    templateRef: build
    templateInputs:
      steps:
        - step:
            identifier: test
            command: a
        - step:
            identifier: test
            command: b
"#,
        )
        .unwrap_err();
    assert!(matches!(err, ResolveError::AmbiguousInputMerge { .. }));
    assert_eq!(err.fqp().unwrap().to_string(), "stepGroup.steps");
}

#[test]
fn test_allowed_values_enforced() {
    let fx = Fixture::new();
    fx.add(
        template(
            acc(),
            "env",
            "v1",
            "Stage",
            "type: Deployment\nspec:\n  env: <+input>.allowedValues(dev,prod)\n",
        ),
        true,
    );
    let err = fx
        .resolve("stage:\n  template:\n    templateRef: env\n    templateInputs:\n      spec:\n        env: qa\n")
        .unwrap_err();
    match err {
        ResolveError::InvalidInputValue { value, allowed, fqp } => {
            assert_eq!(value, "qa");
            assert_eq!(allowed, vec!["dev", "prod"]);
            assert_eq!(fqp.to_string(), "stage.spec.env");
        }
        other => panic!("Expected InvalidInputValue, got {:?}", other),
    }
}

#[test]
fn test_markers_retained_through_service() {
    let fx = end_to_end_fixture();
    let service = TemplateService::new(fx.store.clone());
    let out = service
        .resolve_str(
            "spec:\n  template:\n    templateRef: svc\n",
            &acc(),
            &ResolveOptions::default().with_markers_retained(true),
        )
        .unwrap();
    assert_eq!(out.document["spec"]["template"]["templateRef"], yaml("svc"));
    assert_eq!(
        out.document["spec"]["deploy"]["template"]["versionLabel"],
        yaml("v1")
    );
    assert_eq!(out.document["spec"]["deploy"]["type"], yaml("Rollout"));
}

/// Wraps a repository and records how it is called
struct CountingRepository {
    inner: Arc<InMemoryTemplateStore>,
    batches: Mutex<Vec<usize>>,
    singles: Mutex<usize>,
}

impl TemplateRepository for CountingRepository {
    fn get_version(
        &self,
        family: &FamilyKey,
        version: &str,
    ) -> Result<Option<TemplateEntity>, RepositoryError> {
        *self.singles.lock().unwrap() += 1;
        self.inner.get_version(family, version)
    }

    fn get_stable(&self, family: &FamilyKey) -> Result<Option<TemplateEntity>, RepositoryError> {
        *self.singles.lock().unwrap() += 1;
        self.inner.get_stable(family)
    }

    fn get_batch(&self, keys: &[TemplateKey]) -> BatchFetch {
        self.batches.lock().unwrap().push(keys.len());
        self.inner.get_batch(keys)
    }
}

#[test]
fn test_sibling_references_are_batched() {
    let fx = Fixture::new();
    let mut doc = String::from("steps:\n");
    for i in 0..5 {
        fx.add(
            template(acc(), &format!("s{}", i), "v1", "Step", &format!("n: {}\n", i)),
            true,
        );
        doc.push_str(&format!(
            "  - step:\n      template:\n        templateRef: s{}\n",
            i
        ));
    }
    // Repeats are served from the cache
    doc.push_str("  - step:\n      template:\n        templateRef: s0\n");

    let repo = CountingRepository {
        inner: fx.store.clone(),
        batches: Mutex::new(Vec::new()),
        singles: Mutex::new(0),
    };
    let config = ResolverConfig::default()
        .with_batch_size(2)
        .with_parallel_fetch(false);
    let out = Resolver::new(&repo, config)
        .resolve(yaml(&doc), &acc(), &ResolveOptions::default())
        .unwrap();

    assert_eq!(out.references.len(), 6);
    assert_eq!(*repo.batches.lock().unwrap(), vec![2, 2, 1]);
    assert_eq!(*repo.singles.lock().unwrap(), 0);
}

#[test]
fn test_parallel_prefetch_fetches_every_level() {
    let fx = chain_fixture(4);
    let repo = CountingRepository {
        inner: fx.store.clone(),
        batches: Mutex::new(Vec::new()),
        singles: Mutex::new(0),
    };
    let out = Resolver::new(&repo, ResolverConfig::default().with_batch_size(1))
        .resolve(
            yaml("a:\n  template:\n    templateRef: l0\nb:\n  template:\n    templateRef: l1\n"),
            &acc(),
            &ResolveOptions::default(),
        )
        .unwrap();

    assert_eq!(out.references.len(), 7);
    let fetched: usize = repo.batches.lock().unwrap().iter().sum();
    assert_eq!(fetched, 4);
    assert_eq!(*repo.singles.lock().unwrap(), 0);
}

/// Serves no batch; every batched key fails
struct UnavailableBatchRepository {
    singles: Mutex<usize>,
}

impl TemplateRepository for UnavailableBatchRepository {
    fn get_version(
        &self,
        _family: &FamilyKey,
        _version: &str,
    ) -> Result<Option<TemplateEntity>, RepositoryError> {
        *self.singles.lock().unwrap() += 1;
        Ok(None)
    }

    fn get_stable(&self, _family: &FamilyKey) -> Result<Option<TemplateEntity>, RepositoryError> {
        *self.singles.lock().unwrap() += 1;
        Ok(None)
    }

    fn get_batch(&self, keys: &[TemplateKey]) -> BatchFetch {
        let mut out = BatchFetch::default();
        for key in keys {
            out.failed
                .insert(key.clone(), RepositoryError::Unavailable("store offline".to_string()));
        }
        out
    }
}

#[test]
fn test_failed_batch_surfaces_repository_error() {
    let repo = UnavailableBatchRepository {
        singles: Mutex::new(0),
    };
    let err = Resolver::new(&repo, ResolverConfig::default())
        .resolve(
            yaml("stage:\n  template:\n    templateRef: svc\n"),
            &acc(),
            &ResolveOptions::default(),
        )
        .unwrap_err();

    match err {
        ResolveError::Repository { fqp, source } => {
            assert_eq!(fqp.to_string(), "stage.template");
            assert!(matches!(source, RepositoryError::Unavailable(_)));
        }
        other => panic!("Expected Repository, got {:?}", other),
    }
    assert_eq!(*repo.singles.lock().unwrap(), 0);
}

#[test]
fn test_missing_template_costs_no_single_fetch() {
    let fx = end_to_end_fixture();
    let repo = CountingRepository {
        inner: fx.store.clone(),
        batches: Mutex::new(Vec::new()),
        singles: Mutex::new(0),
    };
    let err = Resolver::new(&repo, ResolverConfig::default())
        .resolve(
            yaml("stage:\n  template:\n    templateRef: nowhere\n"),
            &acc(),
            &ResolveOptions::default(),
        )
        .unwrap_err();

    assert!(matches!(err, ResolveError::TemplateNotFound { .. }));
    assert_eq!(*repo.batches.lock().unwrap(), vec![1]);
    assert_eq!(*repo.singles.lock().unwrap(), 0);
}
