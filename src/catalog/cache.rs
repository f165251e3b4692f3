//! Shared cache of immutable model snapshots
//!
//! Models are keyed by (catalog id, snapshot version). A structural change
//! in a catalog produces a new version, so stale entries are never served
//! once the caller asks for the current version; `invalidate` drops them
//! eagerly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::model::Model;
use crate::error::ErmResult;

struct Entry {
    model: Arc<Model>,
    /// Clock tick of the last lookup or insert
    used: AtomicU64,
}

/// Cache of built models, evicting the least recently used snapshot
pub struct ModelCache {
    entries: RwLock<HashMap<(String, u64), Entry>>,
    clock: AtomicU64,
    capacity: usize,
}

impl ModelCache {
    /// Create a cache holding at most `capacity` snapshots
    pub fn new(capacity: usize) -> Self {
        ModelCache {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Cached snapshot, if present
    pub fn get(&self, catalog_id: &str, version: u64) -> Option<Arc<Model>> {
        let entries = self.entries.read();
        let entry = entries.get(&(catalog_id.to_string(), version))?;
        entry.used.store(self.tick(), Ordering::Relaxed);
        Some(entry.model.clone())
    }

    /// Cached snapshot, building and inserting it on a miss
    ///
    /// The builder runs without the lock held; if two callers race, the
    /// first inserted model wins and both receive it.
    pub fn get_or_build<F>(&self, catalog_id: &str, version: u64, build: F) -> ErmResult<Arc<Model>>
    where
        F: FnOnce() -> ErmResult<Model>,
    {
        if let Some(model) = self.get(catalog_id, version) {
            return Ok(model);
        }
        let built = Arc::new(build()?);
        tracing::debug!(catalog = catalog_id, version, "model cache miss");

        let key = (catalog_id.to_string(), version);
        let now = self.tick();
        let mut entries = self.entries.write();
        let entry = entries.entry(key.clone()).or_insert_with(|| Entry {
            model: built,
            used: AtomicU64::new(now),
        });
        entry.used.store(now, Ordering::Relaxed);
        let model = entry.model.clone();
        while entries.len() > self.capacity {
            let victim = entries
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, e)| e.used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
        Ok(model)
    }

    /// Drop every snapshot of a catalog
    pub fn invalidate(&self, catalog_id: &str) {
        let mut entries = self.entries.write();
        entries.retain(|(id, _), _| id != catalog_id);
        tracing::debug!(catalog = catalog_id, "model cache invalidated");
    }

    /// Mutable deep copy for callers that derive a new snapshot
    pub fn private_copy(&self, catalog_id: &str, version: u64) -> Option<Model> {
        self.get(catalog_id, version).map(|m| (*m).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
