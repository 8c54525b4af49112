//! Entity extraction
//!
//! Two LLM passes per episode: the first asks only for entities, the second
//! only for relationships between them. The second pass is skipped entirely
//! when the first yields nothing useful - most chat messages mention no
//! entities and the relationship prompt is the expensive one.

mod cache;
mod filters;
mod resolve;

pub use cache::{CacheEntry, CacheSnapshot, EntityCache};
pub use filters::post_process;
pub use resolve::{Resolver, DEFAULT_EMBED_THRESHOLD};

use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::llm::json::parse_json_block;
use crate::llm::LanguageModel;
use crate::model::{Episode, EntityKind};
use crate::store::Store;

/// A candidate entity out of pass 1 (or the regex rescue).
#[derive(Debug, Clone)]
pub struct ExtractedEntity {
    /// Surface name as extracted
    pub name: String,
    /// Closed-enum kind
    pub kind: EntityKind,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct EntityList {
    #[serde(default)]
    entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RelationshipList {
    #[serde(default)]
    relationships: Vec<RawRelationship>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Extracts entities and relationships from episodes and accumulates them
/// in the knowledge graph.
pub struct EntityExtractor {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    resolver: Resolver,
}

impl EntityExtractor {
    /// Create an extractor over the store and gateway.
    pub fn new(store: Arc<Store>, model: Arc<dyn LanguageModel>) -> Self {
        let resolver = Resolver::new(Arc::clone(&store), Arc::clone(&model));
        Self {
            store,
            model,
            resolver,
        }
    }

    /// Run both passes over one episode: extract, filter, resolve, link
    /// mentions, then (when pass 1 found anything useful) extract and record
    /// relationships. Returns the resolved entity IDs.
    pub async fn process_episode(&self, episode: &Episode) -> Result<Vec<String>> {
        let llm_candidates = match self.extract_entities(&episode.content).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("Entity pass failed for {}: {}", episode.id, e);
                Vec::new()
            }
        };

        // Garbage gate decides whether the relationship pass runs at all
        let useful: Vec<&RawEntity> = llm_candidates
            .iter()
            .filter(|c| {
                EntityKind::parse_name(&c.kind) != EntityKind::Other
                    && c.name.to_lowercase() != "none"
            })
            .collect();
        let run_relationship_pass = !useful.is_empty();

        let candidates: Vec<ExtractedEntity> = useful
            .iter()
            .map(|c| ExtractedEntity {
                name: c.name.clone(),
                kind: EntityKind::parse_name(&c.kind),
                confidence: c.confidence.clamp(0.0, 1.0),
            })
            .collect();
        let candidates = post_process(candidates, &episode.content);

        let mut resolved: Vec<(String, String)> = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            match self.resolver.resolve(candidate).await {
                Ok(entity_id) => {
                    self.store.add_episode_mention(&episode.id, &entity_id)?;
                    resolved.push((candidate.name.clone(), entity_id));
                }
                Err(e) => tracing::warn!(
                    "Resolution failed for '{}' in {}: {}",
                    candidate.name,
                    episode.id,
                    e
                ),
            }
        }

        if run_relationship_pass && resolved.len() >= 2 {
            if let Err(e) = self.relationship_pass(episode, &resolved).await {
                tracing::warn!("Relationship pass failed for {}: {}", episode.id, e);
            }
        }

        Ok(resolved.into_iter().map(|(_, id)| id).collect())
    }

    async fn extract_entities(&self, content: &str) -> Result<Vec<RawEntity>> {
        let prompt = format!(
            "Extract named entities from this message.\n\n\
             Return only JSON, no commentary:\n\
             {{\"entities\":[{{\"name\":\"...\",\"type\":\"PERSON|ORG|PLACE|PRODUCT|EVENT|EMAIL|MONEY|DATE|OTHER\",\"confidence\":0.0}}]}}\n\n\
             Message:\n{}",
            content
        );
        let output = self.model.generate(&prompt).await?;
        let parsed: EntityList = parse_json_block(&output)
            .map_err(crate::error::EngineError::Parse)?;
        Ok(parsed.entities)
    }

    async fn relationship_pass(
        &self,
        episode: &Episode,
        resolved: &[(String, String)],
    ) -> Result<()> {
        let names: Vec<&str> = resolved.iter().map(|(name, _)| name.as_str()).collect();
        let entity_ids: Vec<String> = resolved.iter().map(|(_, id)| id.clone()).collect();

        // Known relations give the model something to extend instead of
        // re-deriving, and let it notice supersessions
        let known = self.store.active_relation_facts(&entity_ids)?;
        let context = if known.is_empty() {
            String::new()
        } else {
            format!("\nKnown relations:\n- {}\n", known.join("\n- "))
        };

        let prompt = format!(
            "Entities found in this message: {}.\n{}\
             Extract relationships between these entities from the message.\n\n\
             Return only JSON, no commentary:\n\
             {{\"relationships\":[{{\"subject\":\"...\",\"predicate\":\"affiliated_with|kin_of|knows|located_in|has\",\"object\":\"...\",\"confidence\":0.0}}]}}\n\n\
             Message:\n{}",
            names.join(", "),
            context,
            episode.content
        );

        let output = self.model.generate(&prompt).await?;
        let parsed: RelationshipList =
            parse_json_block(&output).map_err(crate::error::EngineError::Parse)?;

        for relation in parsed.relationships {
            let subject = resolved
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&relation.subject))
                .map(|(_, id)| id.clone());
            let object = resolved
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&relation.object))
                .map(|(_, id)| id.clone());

            let (Some(subject), Some(object)) = (subject, object) else {
                continue;
            };
            if subject == object {
                continue;
            }
            self.resolver.record_relation(
                &subject,
                &object,
                &relation.predicate,
                relation.confidence.clamp(0.0, 1.0),
                Some(&episode.id),
            )?;
        }
        Ok(())
    }
}
