//! Process-wide entity pattern cache
//!
//! Entity seeding scans query text for whole-word mentions of canonical
//! names and aliases. Compiling those patterns per query would dominate
//! retrieval latency, so one snapshot is shared process-wide and rebuilt
//! lazily - under the write lock, with a double check - whenever any entity
//! write bumps the store's epoch counter.

use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::error::Result;
use crate::store::Store;

/// One entity with its compiled name/alias patterns.
#[derive(Debug)]
pub struct CacheEntry {
    /// Entity ID
    pub entity_id: String,
    /// Canonical name (for logs)
    pub name: String,
    /// Salience at snapshot time
    pub salience: f64,
    /// Word-boundary patterns over name and aliases (terms of length >= 3)
    pub patterns: Vec<Regex>,
}

impl CacheEntry {
    /// Whether any pattern matches the query text.
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// An immutable snapshot of the cache, ordered salience-descending.
#[derive(Debug)]
pub struct CacheSnapshot {
    epoch: u64,
    /// Entries ordered by salience descending
    pub entries: Vec<CacheEntry>,
}

/// Lazily built, epoch-invalidated entity pattern cache.
#[derive(Default)]
pub struct EntityCache {
    inner: RwLock<Option<Arc<CacheSnapshot>>>,
}

impl EntityCache {
    /// Create an empty cache; the first snapshot builds it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, rebuilding if any entity write happened since the
    /// last build.
    pub fn snapshot(&self, store: &Store) -> Result<Arc<CacheSnapshot>> {
        let epoch = store.entity_epoch();

        if let Ok(guard) = self.inner.read() {
            if let Some(snapshot) = guard.as_ref() {
                if snapshot.epoch == epoch {
                    return Ok(Arc::clone(snapshot));
                }
            }
        }

        let mut guard = self
            .inner
            .write()
            .map_err(|_| crate::error::EngineError::Init("Entity cache lock poisoned".into()))?;
        // Double check: another thread may have rebuilt while we waited
        if let Some(snapshot) = guard.as_ref() {
            if snapshot.epoch == epoch {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(Self::build(store, epoch)?);
        *guard = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn build(store: &Store, epoch: u64) -> Result<CacheSnapshot> {
        let entities = store.all_entities()?;
        let mut entries = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut patterns = Vec::new();
            for term in std::iter::once(entity.name.as_str())
                .chain(entity.aliases.iter().map(|a| a.as_str()))
            {
                if term.chars().count() < 3 {
                    continue;
                }
                match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))) {
                    Ok(re) => patterns.push(re),
                    Err(e) => tracing::warn!("Bad entity pattern for '{}': {}", term, e),
                }
            }
            if patterns.is_empty() {
                continue;
            }
            entries.push(CacheEntry {
                entity_id: entity.id,
                name: entity.name,
                salience: entity.salience,
                patterns,
            });
        }
        tracing::debug!("Rebuilt entity cache: {} entries at epoch {}", entries.len(), epoch);
        Ok(CacheSnapshot { epoch, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids;
    use crate::model::EntityKind;

    #[test]
    fn snapshot_is_reused_until_write() {
        let store = Store::open_in_memory(4).unwrap();
        let id = ids::entity_id("Sarah");
        store.add_entity(&id, "Sarah", EntityKind::Person, 0.5).unwrap();

        let cache = EntityCache::new();
        let first = cache.snapshot(&store).unwrap();
        let second = cache.snapshot(&store).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        store.increment_entity_salience(&id, 0.1).unwrap();
        let third = cache.snapshot(&store).unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn matches_whole_words_case_insensitive() {
        let store = Store::open_in_memory(4).unwrap();
        let id = ids::entity_id("Jane");
        store.add_entity(&id, "Jane", EntityKind::Person, 0.5).unwrap();

        let cache = EntityCache::new();
        let snapshot = cache.snapshot(&store).unwrap();
        let entry = &snapshot.entries[0];
        assert!(entry.matches("what did jane say"));
        assert!(entry.matches("ask Jane."));
        assert!(!entry.matches("janet is someone else"));
    }

    #[test]
    fn short_terms_are_skipped() {
        let store = Store::open_in_memory(4).unwrap();
        let id = ids::entity_id("Al");
        store.add_entity(&id, "Al", EntityKind::Person, 0.5).unwrap();

        let cache = EntityCache::new();
        let snapshot = cache.snapshot(&store).unwrap();
        assert!(snapshot.entries.is_empty());
    }

    #[test]
    fn entries_ordered_by_salience() {
        let store = Store::open_in_memory(4).unwrap();
        let low = ids::entity_id("Background");
        let high = ids::entity_id("Mainchar");
        store.add_entity(&low, "Background", EntityKind::Person, 0.2).unwrap();
        store.add_entity(&high, "Mainchar", EntityKind::Person, 0.9).unwrap();

        let cache = EntityCache::new();
        let snapshot = cache.snapshot(&store).unwrap();
        assert_eq!(snapshot.entries[0].name, "Mainchar");
    }
}
