//! Template resolution - expands reference nodes into the templates they name
//!
//! Resolution runs in two passes. Discovery walks the document, and then each level of
//! fetched template bodies, collecting every identity it can see and fetching them in
//! batches. Expansion then walks the document depth-first, splicing merged template
//! skeletons in place of reference nodes and recursing into what it spliced.

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::tree::{key_string, Fqp};

use super::cache::{FetchBatcher, ResolutionCache};
use super::entity::{EntityType, Scope, TemplateKey};
use super::merge::merge_inputs;
use super::reference::{
    is_referencing_object, reference_nodes, TemplateReference, TemplateReferenceSummary,
};
use super::repository::TemplateRepository;

/// Per-call resolution options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Keep each reference node next to the keys spliced in for it
    pub expand_with_markers_retained: bool,
}

impl ResolveOptions {
    pub fn with_markers_retained(mut self, retained: bool) -> Self {
        self.expand_with_markers_retained = retained;
        self
    }
}

/// Output of one resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub document: Value,
    /// Every reference expanded, in document pre-order
    pub references: Vec<TemplateReferenceSummary>,
}

/// State of one top-level resolution
#[derive(Debug, Default)]
pub struct ResolutionContext {
    /// Templates fetched so far
    pub cache: ResolutionCache,
    /// Exact versions being expanded on the current path (for cycle detection)
    pub resolving: Vec<TemplateKey>,
    /// Summaries collected so far
    pub references: Vec<TemplateReferenceSummary>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a version is being expanded further up the current path
    pub fn is_resolving(&self, key: &TemplateKey) -> bool {
        self.resolving.contains(key)
    }

    pub fn start_resolving(&mut self, key: TemplateKey) {
        self.resolving.push(key);
    }

    pub fn done_resolving(&mut self) {
        self.resolving.pop();
    }

    /// Add the modules of every summary from `first` on to the summary at `at`
    pub fn inherit_modules(&mut self, at: usize, first: usize) {
        let nested: Vec<String> = self
            .references
            .iter()
            .skip(first)
            .flat_map(|r| r.modules.iter().cloned())
            .collect();
        if let Some(summary) = self.references.get_mut(at) {
            for module in nested {
                if !summary.modules.contains(&module) {
                    summary.modules.push(module);
                }
            }
        }
    }

    /// The current expansion path followed by `next`
    pub fn chain(&self, next: &TemplateKey) -> Vec<String> {
        self.resolving
            .iter()
            .chain(std::iter::once(next))
            .map(ToString::to_string)
            .collect()
    }
}

/// Expands template references against a repository
pub struct Resolver<'a> {
    repository: &'a dyn TemplateRepository,
    config: ResolverConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(repository: &'a dyn TemplateRepository, config: ResolverConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Expand every reference in `document`, resolving unprefixed identifiers in `scope`
    ///
    /// References without a version label resolve to whatever is stable at fetch time,
    /// so two calls may legitimately differ if the stable version moved in between.
    pub fn resolve(
        &self,
        document: Value,
        scope: &Scope,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        let marker = self.config.marker_key.as_str();
        if reference_nodes(&document, marker).is_empty() {
            debug!("document has no template references");
            return Ok(Resolution {
                document,
                references: Vec::new(),
            });
        }

        let batcher = FetchBatcher::new(
            self.repository,
            self.config.batch_size,
            self.config.parallel_fetch,
        );
        let mut ctx = ResolutionContext::new();
        self.discover(&document, scope, &batcher, &mut ctx.cache);

        let mut document = document;
        let expansion = Expansion {
            resolver: self,
            batcher: &batcher,
            options,
        };
        expansion.expand_value(&mut document, &Fqp::root(), scope, 0, &mut ctx)?;

        info!(
            references = ctx.references.len(),
            fetched = ctx.cache.len(),
            "resolved template references"
        );
        Ok(Resolution {
            document,
            references: ctx.references,
        })
    }

    /// Prefetch every identity reachable from `document`, one nesting level per round
    fn discover(
        &self,
        document: &Value,
        scope: &Scope,
        batcher: &FetchBatcher<'_>,
        cache: &mut ResolutionCache,
    ) {
        let marker = self.config.marker_key.as_str();
        let mut keys = self.scan(document, scope);
        let mut level = 0;

        while !keys.is_empty() && level < self.config.max_depth {
            debug!(level, identities = keys.len(), "discovery pass");
            let fetched = batcher.prefetch(cache, &keys);
            keys = fetched
                .iter()
                .filter_map(|entity| {
                    let skeleton = entity.skeleton()?;
                    (!reference_nodes(skeleton, marker).is_empty())
                        .then(|| self.scan(skeleton, &entity.scope))
                })
                .flatten()
                .collect();
            level += 1;
        }
    }

    /// Identities of the well-formed references in `tree`; malformed ones fail later
    fn scan(&self, tree: &Value, scope: &Scope) -> Vec<TemplateKey> {
        reference_nodes(tree, &self.config.marker_key)
            .into_iter()
            .filter_map(|(path, node)| TemplateReference::parse(node, path, scope).ok())
            .map(|reference| reference.key())
            .collect()
    }
}

/// The expansion pass of one resolution
struct Expansion<'r, 'a> {
    resolver: &'r Resolver<'a>,
    batcher: &'r FetchBatcher<'a>,
    options: &'r ResolveOptions,
}

impl Expansion<'_, '_> {
    fn marker(&self) -> &str {
        &self.resolver.config.marker_key
    }

    /// Expand every reference at or below `value`, which sits at `path`
    fn expand_value(
        &self,
        value: &mut Value,
        path: &Fqp,
        scope: &Scope,
        depth: usize,
        ctx: &mut ResolutionContext,
    ) -> Result<(), ResolveError> {
        match value {
            Value::Mapping(map) if is_referencing_object(map, self.marker()) => {
                let object = std::mem::take(map);
                *value = self.expand_object(object, path, scope, depth, ctx)?;
            }
            Value::Mapping(map) => {
                for (key, child) in map.iter_mut() {
                    let child_path = path.child(key_string(key));
                    self.expand_value(child, &child_path, scope, depth, ctx)?;
                }
            }
            Value::Sequence(seq) => {
                for (i, child) in seq.iter_mut().enumerate() {
                    self.expand_value(child, &path.element(i), scope, depth, ctx)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Replace a referencing object with its own keys plus the referenced skeleton
    fn expand_object(
        &self,
        object: Mapping,
        path: &Fqp,
        scope: &Scope,
        depth: usize,
        ctx: &mut ResolutionContext,
    ) -> Result<Value, ResolveError> {
        let marker = self.marker().to_string();
        let node_path = path.child(marker.as_str());
        let node = object.get(marker.as_str()).cloned().unwrap_or(Value::Null);
        let reference = TemplateReference::parse(&node, node_path.clone(), scope)?;

        let limit = self.resolver.config.max_depth;
        if depth >= limit {
            return Err(ResolveError::RecursionLimitExceeded {
                limit,
                fqp: node_path,
            });
        }

        let key = reference.key();
        let entity = self
            .batcher
            .fetch(&mut ctx.cache, &key)
            .map_err(|source| ResolveError::Repository {
                fqp: node_path.clone(),
                source,
            })?
            .ok_or_else(|| {
                ResolveError::not_found(
                    reference.identifier.clone(),
                    reference.requested_version.clone(),
                    node_path.clone(),
                )
            })?;

        if let Some(expected) = path.last_field().and_then(EntityType::from_field) {
            if expected != entity.entity_type {
                return Err(ResolveError::invalid_reference(
                    format!(
                        "template '{}' is a {} template but is used as a {}",
                        entity.identifier, entity.entity_type, expected
                    ),
                    node_path,
                ));
            }
        }

        let exact = entity.key();
        if ctx.is_resolving(&exact) {
            return Err(ResolveError::cyclic(&ctx.chain(&exact), node_path));
        }

        debug!(path = %path, template = %exact, depth, "expanding template reference");
        let summary_at = ctx.references.len();
        ctx.references.push(reference.summarize(&entity));

        let skeleton = entity.skeleton().ok_or_else(|| {
            ResolveError::invalid_body(exact.to_string(), "template has no spec", node_path.clone())
        })?;
        let body = merge_inputs(skeleton, reference.inputs.as_ref(), path)?;

        // Rebuild the object in key order: own keys expand in the caller's scope, the
        // skeleton lands at the marker's position and expands in the template's scope.
        let own: Vec<Value> = object
            .keys()
            .filter(|k| k.as_str() != Some(marker.as_str()))
            .cloned()
            .collect();
        let mut out = Mapping::with_capacity(own.len() + 4);
        let mut body = Some(body);

        for (key, mut value) in object {
            if key.as_str() != Some(marker.as_str()) {
                let child_path = path.child(key_string(&key));
                self.expand_value(&mut value, &child_path, scope, depth, ctx)?;
                out.insert(key, value);
                continue;
            }

            let mut spliced = body.take().unwrap_or(Value::Null);
            let first_nested = ctx.references.len();
            ctx.start_resolving(exact.clone());
            let expanded = self.expand_value(&mut spliced, path, &entity.scope, depth + 1, ctx);
            ctx.done_resolving();
            expanded?;
            // A template needs the modules of everything it pulls in
            ctx.inherit_modules(summary_at, first_nested);

            match spliced {
                Value::Mapping(fields) => {
                    for (k, v) in fields {
                        if !own.contains(&k) {
                            out.insert(k, v);
                        }
                    }
                }
                other if own.is_empty() => {
                    if self.options.expand_with_markers_retained {
                        debug!(path = %path, "reference replaced by a non-mapping; marker dropped");
                    }
                    return Ok(other);
                }
                _ => {
                    return Err(ResolveError::invalid_body(
                        exact.to_string(),
                        "skeleton is not a mapping, but the referencing object has other keys",
                        node_path,
                    ))
                }
            }
            if self.options.expand_with_markers_retained {
                out.insert(key, value);
            }
        }
        Ok(Value::Mapping(out))
    }
}
