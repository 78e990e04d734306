//! Resource cache
//!
//! Sharded map from normalized identifier to entity. Each shard has its own
//! lock, so writers to distinct keys rarely contend, and no lock is ever held
//! longer than a map operation.

use super::entity::Resource;
use super::identity::ResourceId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

const SHARDS: usize = 16;

type Shard = RwLock<HashMap<String, Arc<Resource>>>;

pub struct ResourceCache {
    shards: Vec<Shard>,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARDS]
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<Resource>> {
        let key = id.normalized();
        let shard = self.shard(&key).read().unwrap_or_else(PoisonError::into_inner);
        shard.get(&key).cloned()
    }

    /// Insert or replace; returns the entity previously cached under the same id
    pub fn put(&self, entity: Arc<Resource>) -> Option<Arc<Resource>> {
        let key = entity.id().normalized();
        let mut shard = self.shard(&key).write().unwrap_or_else(PoisonError::into_inner);
        shard.insert(key, entity)
    }

    /// Return the cached entity for `id`, inserting `make()` when absent.
    /// Concurrent callers for the same id all get the same entity.
    pub fn get_or_insert_with<F>(&self, id: &ResourceId, make: F) -> Arc<Resource>
    where
        F: FnOnce() -> Arc<Resource>,
    {
        let key = id.normalized();
        let mut shard = self.shard(&key).write().unwrap_or_else(PoisonError::into_inner);
        shard.entry(key).or_insert_with(make).clone()
    }

    /// Drop a single entry
    pub fn invalidate(&self, id: &ResourceId) -> Option<Arc<Resource>> {
        let key = id.normalized();
        let mut shard = self.shard(&key).write().unwrap_or_else(PoisonError::into_inner);
        shard.remove(&key)
    }

    /// Drop an entry together with every partition below it. Descendants are
    /// invalidated at write-clock `at`; the entry itself is left to the caller.
    pub fn invalidate_subtree(&self, id: &ResourceId, at: u64) -> usize {
        match self.invalidate(id) {
            Some(entity) => 1 + entity.evict_children(at),
            None => 0,
        }
    }

    /// Keep only entries for which `keep` returns true and return the rest.
    /// Removed entries are not touched; see [`ResourceCache::evict`].
    pub fn retain<F>(&self, mut keep: F) -> Vec<Arc<Resource>>
    where
        F: FnMut(&Arc<Resource>) -> bool,
    {
        let mut removed = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.write().unwrap_or_else(PoisonError::into_inner);
            shard.retain(|_, entity| {
                let kept = keep(entity);
                if !kept {
                    removed.push(entity.clone());
                }
                kept
            });
        }
        removed
    }

    /// Invalidate entries already removed from a partition, and everything
    /// cached below them
    pub fn evict(removed: &[Arc<Resource>], at: u64) {
        for entity in removed {
            entity.invalidate(at);
            entity.evict_children(at);
        }
    }

    /// Empty this partition and everything below it; returns how many entries
    /// this partition held
    pub fn clear(&self, at: u64) -> usize {
        let removed = self.retain(|_| false);
        Self::evict(&removed, at);
        removed.len()
    }

    pub fn values(&self) -> Vec<Arc<Resource>> {
        self.shards
            .iter()
            .flat_map(|shard| {
                let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
                shard.values().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
