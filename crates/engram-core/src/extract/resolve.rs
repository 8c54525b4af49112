//! Entity resolution
//!
//! Matches extracted candidates against canonical entities: exact name or
//! alias first, then PERSON-only fuzzy name matching, then embedding nearest
//! neighbor. Embedding matches never add aliases - vector similarity does
//! not imply identity. Every successful match bumps salience by 0.1.

use std::sync::Arc;

use crate::error::Result;
use crate::ids;
use crate::llm::LanguageModel;
use crate::model::{Entity, EntityKind, RelationKind};
use crate::store::Store;
use crate::vector;

use super::ExtractedEntity;

/// Salience increment per re-mention.
const SALIENCE_BUMP: f64 = 0.1;

/// Default cosine threshold for embedding-based resolution.
pub const DEFAULT_EMBED_THRESHOLD: f32 = 0.85;

/// Resolves candidates to canonical entity IDs and maintains relations.
pub struct Resolver {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    embed_threshold: f32,
}

impl Resolver {
    /// Create a resolver with the default embedding threshold.
    pub fn new(store: Arc<Store>, model: Arc<dyn LanguageModel>) -> Self {
        Self::with_threshold(store, model, DEFAULT_EMBED_THRESHOLD)
    }

    /// Create a resolver with a custom embedding threshold.
    pub fn with_threshold(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        embed_threshold: f32,
    ) -> Self {
        Self {
            store,
            model,
            embed_threshold,
        }
    }

    /// Resolve one candidate to an entity ID, creating the entity when
    /// nothing matches.
    pub async fn resolve(&self, candidate: &ExtractedEntity) -> Result<String> {
        // 1. Exact case-insensitive match on canonical name or alias
        if let Some(entity) = self.store.find_entity_by_name(&candidate.name)? {
            self.bump_salience(&entity.id);
            return Ok(entity.id);
        }

        // 2. PERSON-only fuzzy name matching
        if candidate.kind == EntityKind::Person {
            if let Some(entity) = self.fuzzy_person_match(&candidate.name)? {
                if candidate.name.chars().count() > entity.name.chars().count() {
                    // Richer form observed: expand the canonical name and keep
                    // the old one reachable as an alias
                    self.store.rename_entity(&entity.id, &candidate.name)?;
                    self.store.add_entity_alias(&entity.id, &entity.name)?;
                } else {
                    self.store.add_entity_alias(&entity.id, &candidate.name)?;
                }
                self.bump_salience(&entity.id);
                return Ok(entity.id);
            }
        }

        // 3. Embedding nearest neighbor. No alias: similarity is not identity.
        if let Ok(query) = self.model.embed(&candidate.name).await {
            if let Some(entity_id) = self.nearest_entity(&query)? {
                self.bump_salience(&entity_id);
                return Ok(entity_id);
            }
        }

        // 4. New entity, extraction confidence as initial salience
        let id = ids::entity_id(&candidate.name);
        self.store
            .add_entity(&id, &candidate.name, candidate.kind, candidate.confidence)?;
        match self.model.embed(&candidate.name).await {
            Ok(embedding) => {
                if let Err(e) = self.store.set_entity_embedding(&id, &embedding) {
                    tracing::warn!("Failed to store embedding for {}: {}", id, e);
                }
            }
            Err(e) => tracing::debug!("No embedding for new entity {}: {}", id, e),
        }
        Ok(id)
    }

    /// Record a relation, deduping against the active (from, to, kind)
    /// triple and invalidating superseded exclusive relations. Returns the
    /// new row ID, or `None` when the triple was already active.
    pub fn record_relation(
        &self,
        subject_id: &str,
        object_id: &str,
        predicate: &str,
        confidence: f64,
        source_episode_id: Option<&str>,
    ) -> Result<Option<i64>> {
        let kind = RelationKind::from_predicate(predicate);
        let active = self.store.active_relations_from(subject_id, kind)?;

        if active.iter().any(|r| r.to_id == object_id) {
            return Ok(None);
        }

        let new_id = self.store.add_entity_relation(
            subject_id,
            object_id,
            kind,
            confidence,
            source_episode_id,
        )?;

        if kind.is_exclusive() {
            for old in &active {
                self.store.invalidate_entity_relation(old.id, new_id)?;
            }
        }

        Ok(Some(new_id))
    }

    fn bump_salience(&self, entity_id: &str) {
        // Advisory write
        if let Err(e) = self.store.increment_entity_salience(entity_id, SALIENCE_BUMP) {
            tracing::warn!("Salience bump failed for {}: {}", entity_id, e);
        }
    }

    /// Substring in either direction, or a shared first token. Candidates
    /// are checked salience-descending so the most established person wins.
    fn fuzzy_person_match(&self, name: &str) -> Result<Option<Entity>> {
        let lower = name.to_lowercase();
        let first_token = lower.split_whitespace().next().unwrap_or("");

        let mut people = self.store.entities_by_kind(EntityKind::Person)?;
        people.sort_by(|a, b| {
            b.salience
                .partial_cmp(&a.salience)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for person in people {
            let stored = person.name.to_lowercase();
            let stored_first = stored.split_whitespace().next().unwrap_or("");
            if stored.contains(&lower)
                || lower.contains(&stored)
                || (!first_token.is_empty() && first_token == stored_first)
            {
                return Ok(Some(person));
            }
        }
        Ok(None)
    }

    fn nearest_entity(&self, query: &[f32]) -> Result<Option<String>> {
        let mut best: Option<(String, f32)> = None;
        for (entity_id, embedding) in self.store.entity_embeddings()? {
            let sim = vector::cosine_similarity(query, &embedding);
            if sim >= self.embed_threshold
                && best.as_ref().map(|(_, b)| sim > *b).unwrap_or(true)
            {
                best = Some((entity_id, sim));
            }
        }
        Ok(best.map(|(id, _)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModel;

    fn setup() -> (Arc<Store>, Arc<MockModel>, Resolver) {
        let store = Arc::new(Store::open_in_memory(8).unwrap());
        let model = Arc::new(MockModel::new(8));
        let resolver = Resolver::new(Arc::clone(&store), model.clone());
        (store, model, resolver)
    }

    fn person(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            kind: EntityKind::Person,
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn create_then_exact_match() {
        let (store, _model, resolver) = setup();
        let id = resolver.resolve(&person("Sarah")).await.unwrap();
        let again = resolver.resolve(&person("sarah")).await.unwrap();
        assert_eq!(id, again);

        let entity = store.get_entity(&id).unwrap().unwrap();
        // Created at 0.8, one re-mention bump
        assert!((entity.salience - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn richer_name_expands_canonical_and_round_trips() {
        let (store, _model, resolver) = setup();
        let id = resolver.resolve(&person("Sarah")).await.unwrap();
        let same = resolver.resolve(&person("Sarah Chen")).await.unwrap();
        assert_eq!(id, same);

        let entity = store.get_entity(&id).unwrap().unwrap();
        assert_eq!(entity.name, "Sarah Chen");
        assert!(entity.aliases.contains(&"Sarah".to_string()));

        // Alias round-trip: both forms find the same entity
        assert_eq!(store.find_entity_by_name("Sarah").unwrap().unwrap().id, id);
        assert_eq!(
            store.find_entity_by_name("Sarah Chen").unwrap().unwrap().id,
            id
        );
    }

    #[tokio::test]
    async fn shorter_form_becomes_alias() {
        let (store, _model, resolver) = setup();
        let id = resolver.resolve(&person("Sarah Chen")).await.unwrap();
        let same = resolver.resolve(&person("Sarah")).await.unwrap();
        assert_eq!(id, same);

        let entity = store.get_entity(&id).unwrap().unwrap();
        assert_eq!(entity.name, "Sarah Chen");
        assert!(entity.aliases.contains(&"Sarah".to_string()));
    }

    fn basis(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[axis] = 1.0;
        v
    }

    #[tokio::test]
    async fn fuzzy_is_person_only() {
        let (_store, model, resolver) = setup();
        model.set_embedding("Acme", basis(8, 0));
        model.set_embedding("Acme Incorporated", basis(8, 1));
        let org = ExtractedEntity {
            name: "Acme".to_string(),
            kind: EntityKind::Org,
            confidence: 0.8,
        };
        let id1 = resolver.resolve(&org).await.unwrap();
        let org_long = ExtractedEntity {
            name: "Acme Incorporated".to_string(),
            kind: EntityKind::Org,
            confidence: 0.8,
        };
        let id2 = resolver.resolve(&org_long).await.unwrap();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn embedding_match_without_alias() {
        let (store, model, resolver) = setup();
        let id = resolver.resolve(&person("Robert")).await.unwrap();

        // Pin "Bobby" to embed identically to "Robert"
        let robert_vec = model.embed("Robert").await.unwrap();
        model.set_embedding("Bobby", robert_vec);

        // Not a substring match and no shared first token; resolves via
        // embedding similarity
        let same = resolver.resolve(&person("Bobby")).await.unwrap();
        assert_eq!(id, same);

        let entity = store.get_entity(&id).unwrap().unwrap();
        assert!(entity.aliases.is_empty());
    }

    #[tokio::test]
    async fn exclusive_relation_invalidates_prior() {
        let (store, model, resolver) = setup();
        model.set_embedding("Sarah", basis(8, 0));
        model.set_embedding("Acme", basis(8, 1));
        model.set_embedding("Globex", basis(8, 2));
        let sarah = resolver.resolve(&person("Sarah")).await.unwrap();
        let acme = resolver
            .resolve(&ExtractedEntity {
                name: "Acme".to_string(),
                kind: EntityKind::Org,
                confidence: 0.8,
            })
            .await
            .unwrap();
        let globex = resolver
            .resolve(&ExtractedEntity {
                name: "Globex".to_string(),
                kind: EntityKind::Org,
                confidence: 0.8,
            })
            .await
            .unwrap();

        resolver
            .record_relation(&sarah, &acme, "works_at", 0.9, None)
            .unwrap()
            .unwrap();
        resolver
            .record_relation(&sarah, &globex, "works_at", 0.9, None)
            .unwrap()
            .unwrap();

        let active = store
            .active_relations_from(&sarah, RelationKind::AffiliatedWith)
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].to_id, globex);
    }

    #[tokio::test]
    async fn duplicate_triple_is_deduped() {
        let (_store, model, resolver) = setup();
        model.set_embedding("Ann", basis(8, 0));
        model.set_embedding("Belinda", basis(8, 1));
        let a = resolver.resolve(&person("Ann")).await.unwrap();
        let b = resolver.resolve(&person("Belinda")).await.unwrap();

        assert!(resolver
            .record_relation(&a, &b, "knows", 0.9, None)
            .unwrap()
            .is_some());
        assert!(resolver
            .record_relation(&a, &b, "knows", 0.9, None)
            .unwrap()
            .is_none());
    }
}
