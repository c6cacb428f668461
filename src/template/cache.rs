//! Batched fetching and the cache that lives for a single resolution

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::entity::{TemplateEntity, TemplateKey};
use super::repository::{BatchFetch, RepositoryError, TemplateRepository};

/// Templates fetched during one top-level resolution
///
/// Keyed both by the identity a reference asked for and by the exact version it
/// resolved to, so "stable" and explicit references to the same version share an entry.
/// Misses and failed fetches are recorded too and answered from here without asking
/// the repository again. Dropped when the resolution finishes; nothing is shared across calls.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: HashMap<TemplateKey, Arc<TemplateEntity>>,
    /// `None` for a miss, `Some` for a failed fetch
    absent: HashMap<TemplateKey, Option<RepositoryError>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TemplateKey) -> Option<Arc<TemplateEntity>> {
        self.entries.get(key).cloned()
    }

    /// Whether the key holds an entity
    pub fn contains(&self, key: &TemplateKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the key was already asked for, with any outcome
    pub fn is_known(&self, key: &TemplateKey) -> bool {
        self.entries.contains_key(key) || self.absent.contains_key(key)
    }

    /// Record `entity` as the answer for `requested`
    pub fn insert(&mut self, requested: TemplateKey, entity: TemplateEntity) -> Arc<TemplateEntity> {
        let entity = Arc::new(entity);
        let exact = entity.key();
        if exact != requested {
            self.entries.insert(exact, Arc::clone(&entity));
        }
        self.entries.insert(requested, Arc::clone(&entity));
        entity
    }

    pub fn insert_missing(&mut self, key: TemplateKey) {
        self.absent.insert(key, None);
    }

    pub fn insert_failed(&mut self, key: TemplateKey, error: RepositoryError) {
        self.absent.insert(key, Some(error));
    }

    /// The recorded outcome of a key, if it was asked for
    pub fn lookup(
        &self,
        key: &TemplateKey,
    ) -> Option<Result<Option<Arc<TemplateEntity>>, RepositoryError>> {
        if let Some(hit) = self.get(key) {
            return Some(Ok(Some(hit)));
        }
        match self.absent.get(key)? {
            None => Some(Ok(None)),
            Some(err) => Some(Err(err.clone())),
        }
    }

    /// Number of keys holding an entity
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Issues repository fetches, in bounded batches
pub struct FetchBatcher<'a> {
    repository: &'a dyn TemplateRepository,
    batch_size: usize,
    parallel: bool,
}

impl<'a> FetchBatcher<'a> {
    pub fn new(repository: &'a dyn TemplateRepository, batch_size: usize, parallel: bool) -> Self {
        Self {
            repository,
            batch_size: batch_size.max(1),
            parallel,
        }
    }

    /// Fetch every key not yet cached and store the hits
    ///
    /// Returns the newly cached entities, in the order of `keys`. Misses and failures
    /// are recorded in the cache; expansion reports them at the referencing node.
    pub fn prefetch(
        &self,
        cache: &mut ResolutionCache,
        keys: &[TemplateKey],
    ) -> Vec<Arc<TemplateEntity>> {
        let mut wanted: Vec<TemplateKey> = Vec::new();
        for key in keys {
            if !cache.is_known(key) && !wanted.contains(key) {
                wanted.push(key.clone());
            }
        }
        if wanted.is_empty() {
            return Vec::new();
        }

        let chunks: Vec<&[TemplateKey]> = wanted.chunks(self.batch_size).collect();
        debug!(keys = wanted.len(), batches = chunks.len(), "prefetching templates");

        let results: Vec<BatchFetch> = if self.parallel && chunks.len() > 1 {
            chunks
                .par_iter()
                .map(|chunk| self.repository.get_batch(chunk))
                .collect()
        } else {
            chunks
                .iter()
                .map(|chunk| self.repository.get_batch(chunk))
                .collect()
        };

        let mut combined = BatchFetch::default();
        for result in results {
            combined.merge(result);
        }
        for (key, err) in combined.failed {
            warn!(template = %key, error = %err, "template fetch failed");
            cache.insert_failed(key, err);
        }
        for key in combined.missing {
            cache.insert_missing(key);
        }

        let mut fetched = Vec::new();
        for key in wanted {
            if let Some(entity) = combined.found.remove(&key) {
                fetched.push(cache.insert(key, entity));
            } else if !cache.is_known(&key) {
                cache.insert_missing(key);
            }
        }
        fetched
    }

    /// Fetch one key through the cache
    pub fn fetch(
        &self,
        cache: &mut ResolutionCache,
        key: &TemplateKey,
    ) -> Result<Option<Arc<TemplateEntity>>, RepositoryError> {
        if let Some(known) = cache.lookup(key) {
            return known;
        }
        debug!(template = %key, "fetching template");
        match self.repository.get(key) {
            Ok(Some(entity)) => Ok(Some(cache.insert(key.clone(), entity))),
            Ok(None) => {
                cache.insert_missing(key.clone());
                Ok(None)
            }
            Err(err) => {
                cache.insert_failed(key.clone(), err.clone());
                Err(err)
            }
        }
    }
}
