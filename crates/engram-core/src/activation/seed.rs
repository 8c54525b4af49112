//! Seed selection
//!
//! Three triggers feed the spread loop: semantic (ANN over the query
//! embedding), lexical (BM25 over trace L32 summaries) and entity
//! (whole-word mentions of canonical names in the query). A context trigger
//! adds explicitly supplied trace IDs. Results are unioned into a set, so
//! trigger ordering never matters.

use std::sync::Arc;

use crate::error::Result;
use crate::extract::EntityCache;
use crate::store::Store;

use super::ActivationParams;

/// Words that never become query keywords.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "has", "have",
    "her", "him", "his", "its", "our", "out", "she", "was", "were", "who", "why", "will", "with",
    "this", "that", "these", "those", "what", "when", "where", "which", "how", "about", "into",
    "over", "under", "then", "than", "them", "they", "there", "here", "does", "did", "doing",
    "been", "being", "from", "your", "mine", "just", "very", "some", "tell", "know", "like",
    "want", "need", "get", "got", "say", "said",
];

/// Extract lexical keywords from query text: lowercased, alphanumeric,
/// stopword-filtered, length >= 3, deduped preserving order.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .filter(|w| !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(|w| w.to_string())
        .collect()
}

/// Semantic trigger: ANN neighbors of the query embedding above the minimum
/// similarity.
pub fn semantic_seeds(
    store: &Store,
    query_embedding: &[f32],
    params: &ActivationParams,
) -> Result<Vec<String>> {
    if query_embedding.is_empty() {
        return Ok(Vec::new());
    }
    let hits = store.similar_traces(
        query_embedding,
        params.seed_limit,
        params.min_seed_similarity,
    )?;
    Ok(hits.into_iter().map(|(id, _)| id).collect())
}

/// Lexical trigger: BM25 top-K over trace L32 summaries (with the store's
/// scan fallback behind it).
pub fn lexical_seeds(
    store: &Store,
    keywords: &[String],
    params: &ActivationParams,
) -> Result<Vec<String>> {
    let hits = store.search_trace_summaries(keywords, params.seed_limit)?;
    Ok(hits.into_iter().map(|(id, _)| id).collect())
}

/// Entity trigger: scan the query for whole-word entity mentions
/// (salience-ordered, pre-compiled patterns) and take up to
/// `entity_seed_traces` traces per matched entity.
pub fn entity_seeds(
    store: &Store,
    cache: &Arc<EntityCache>,
    query: &str,
    params: &ActivationParams,
) -> Result<Vec<String>> {
    let snapshot = cache.snapshot(store)?;
    let mut seeds = Vec::new();
    for entry in &snapshot.entries {
        if !entry.matches(query) {
            continue;
        }
        let traces = store.traces_for_entity(&entry.entity_id, params.entity_seed_traces)?;
        seeds.extend(traces);
        if seeds.len() >= params.seed_limit * 2 {
            break;
        }
    }
    Ok(seeds)
}
