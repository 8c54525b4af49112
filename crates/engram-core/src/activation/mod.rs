//! Spreading-activation retrieval
//!
//! A retrieval request moves through a fixed pipeline:
//! received -> seeded (three triggers, unioned) -> spread (T iterations of
//! decay + fan normalization + lateral inhibition + sigmoid) -> the
//! Feeling-of-Knowing gate -> a two-phase funnel (rank by activation, rerank
//! the shortlist by L8 text relevance) -> operational-bias reweighting ->
//! returned. Terminal states are `returned` and `rejected`; a rejection is
//! indistinguishable from an empty store on purpose.
//!
//! The engine never writes to the store during the spread loop; access
//! boosts happen after results are returned, via [`mark_shown`].

mod params;
mod seed;
mod spread;

pub use params::ActivationParams;
pub use seed::extract_keywords;
pub use spread::{spread_activation, TraceGraph};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::extract::EntityCache;
use crate::model::{RetrievedTrace, TraceType};
use crate::store::Store;

/// Phrases that mark a query as asking about recent system activity;
/// operational traces keep their full weight for these.
const STATUS_MARKERS: &[&str] = &[
    "what did",
    "what's been",
    "what happened",
    "recent",
    "recently",
    "today",
    "yesterday",
    "this week",
    "latest",
    "status",
    "deployed",
    "deploy",
    "meeting",
    "standup",
    "shipped",
];

/// Whether the query asks about recent system activity.
pub fn is_status_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    STATUS_MARKERS.iter().any(|m| lower.contains(m))
}

/// The retrieval engine.
pub struct ActivationEngine {
    store: Arc<Store>,
    cache: Arc<EntityCache>,
    params: ActivationParams,
}

impl ActivationEngine {
    /// Create an engine over the store with a shared entity cache.
    pub fn new(store: Arc<Store>, cache: Arc<EntityCache>, params: ActivationParams) -> Self {
        Self {
            store,
            cache,
            params,
        }
    }

    /// Retrieve the top `limit` traces for a query. The query embedding is
    /// computed by the host's gateway; retrieval itself never calls the LLM.
    pub async fn retrieve(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedTrace>> {
        self.retrieve_inner(query_embedding, query_text, &[], limit, cancel)
            .await
    }

    /// Retrieve with explicitly supplied context seed traces (the attention
    /// layer's current thread).
    pub async fn retrieve_with_context(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        context_trace_ids: &[String],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedTrace>> {
        self.retrieve_inner(query_embedding, query_text, context_trace_ids, limit, cancel)
            .await
    }

    async fn retrieve_inner(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        context_trace_ids: &[String],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedTrace>> {
        tracing::debug!(query = query_text, "retrieval received");
        let keywords = extract_keywords(query_text);

        let seeds = self
            .gather_seeds(query_embedding, query_text, &keywords, context_trace_ids)
            .await?;
        tracing::debug!(seeds = seeds.len(), "retrieval seeded");
        if seeds.is_empty() {
            tracing::debug!("retrieval rejected: no seeds");
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        // Spread is CPU + reads only; deterministic for a given seed set
        let mut graph = TraceGraph::new(&self.store, &self.params);
        let activation = spread_activation(&mut graph, &seeds, &self.params)?;
        tracing::debug!(active = activation.len(), "spread complete");

        // Feeling-of-Knowing gate: equality passes, only strictly-below fails
        let max_activation = activation.values().cloned().fold(0.0f64, f64::max);
        if max_activation < self.params.fok_threshold {
            tracing::debug!(max = max_activation, "retrieval rejected: below FoK gate");
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Canceled);
        }

        let results = self.funnel(activation, &keywords, query_text, limit)?;
        tracing::debug!(returned = results.len(), "retrieval returned");
        Ok(results)
    }

    /// Run the three seed triggers concurrently and union the results.
    async fn gather_seeds(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        keywords: &[String],
        context_trace_ids: &[String],
    ) -> Result<Vec<String>> {
        let params = self.params.clone();

        let semantic = {
            let store = Arc::clone(&self.store);
            let embedding = query_embedding.to_vec();
            let params = params.clone();
            tokio::task::spawn_blocking(move || seed::semantic_seeds(&store, &embedding, &params))
        };
        let lexical = {
            let store = Arc::clone(&self.store);
            let keywords = keywords.to_vec();
            let params = params.clone();
            tokio::task::spawn_blocking(move || seed::lexical_seeds(&store, &keywords, &params))
        };
        let entity = {
            let store = Arc::clone(&self.store);
            let cache = Arc::clone(&self.cache);
            let query = query_text.to_string();
            tokio::task::spawn_blocking(move || seed::entity_seeds(&store, &cache, &query, &params))
        };

        let (semantic, lexical, entity) = tokio::join!(semantic, lexical, entity);

        let mut union: BTreeSet<String> = BTreeSet::new();
        for result in [semantic, lexical, entity] {
            let seeds = result
                .map_err(|e| EngineError::Init(format!("seed task panicked: {e}")))??;
            union.extend(seeds);
        }
        union.extend(context_trace_ids.iter().cloned());
        Ok(union.into_iter().collect())
    }

    /// Two-phase funnel plus operational bias. Phase 1 loads only L8
    /// summaries for the shortlist; phase 2 hydrates full records for the
    /// final list.
    fn funnel(
        &self,
        activation: BTreeMap<String, f64>,
        keywords: &[String],
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedTrace>> {
        // Phase 1: shortlist by activation, rerank by L8 keyword hits
        let mut ranked: Vec<(String, f64)> = activation.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(self.params.phase1_cutoff);

        let mut scored: Vec<(String, f64)> = Vec::with_capacity(ranked.len());
        for (trace_id, activation) in ranked {
            let mut combined = activation;
            if let Some(summary) = self.store.get_trace_summary(&trace_id, 8)? {
                let text = summary.text.to_lowercase();
                let hits = keywords
                    .iter()
                    .filter(|k| text.contains(k.as_str()))
                    .count();
                combined += self.params.keyword_bonus * hits as f64;
            }
            // Returned activations stay within the unit range
            scored.push((trace_id, combined.min(1.0)));
        }
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        // Phase 2: hydrate the final list in batch
        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let traces = self.store.get_traces(&ids)?;
        let by_id: BTreeMap<&str, f64> =
            scored.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        // Operational bias: down-weight system-activity traces unless the
        // query is asking about recent activity
        let status_query = is_status_query(query_text);
        let mut results: Vec<RetrievedTrace> = traces
            .into_iter()
            .map(|trace| {
                let activation = by_id.get(trace.id.as_str()).copied().unwrap_or(0.0);
                let adjusted = if !status_query && trace.trace_type == TraceType::Operational {
                    activation * self.params.operational_penalty
                } else {
                    activation
                };
                RetrievedTrace {
                    trace,
                    activation,
                    adjusted_activation: adjusted,
                }
            })
            .collect();
        results.sort_by(|a, b| {
            b.adjusted_activation
                .partial_cmp(&a.adjusted_activation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.trace.id.cmp(&b.trace.id))
        });
        Ok(results)
    }

    /// Access boost for traces actually shown to the user. Advisory: errors
    /// are logged, never surfaced.
    pub fn mark_shown(&self, trace_ids: &[String], boost: f64) {
        for trace_id in trace_ids {
            if let Err(e) = self.store.boost_trace_access(trace_id, boost) {
                tracing::warn!("Access boost failed for {}: {}", trace_id, e);
            }
        }
    }
}
