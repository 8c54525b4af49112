//! Consolidation engine
//!
//! Turns batches of raw episodes into traces through four phases:
//! duplicate detection over embeddings, LLM edge inference over sliding
//! windows of summaries, connected-component clustering, and trace
//! materialization with a cascaded pyramid and similarity links.
//!
//! A batch never halts over a single bad window or trace: parse failures
//! skip the window, materialization failures skip the cluster.

mod classify;

pub use classify::{classify_trace, is_ephemeral};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::ids;
use crate::llm::LanguageModel;
use crate::llm::json::parse_json_block;
use crate::model::{ConsolidationReport, Episode, Trace, EPHEMERAL_TRACE_ID};
use crate::pyramid::Compressor;
use crate::store::Store;
use crate::vector;

/// Tunable consolidation thresholds.
#[derive(Debug, Clone)]
pub struct ConsolidateParams {
    /// Unconsolidated episodes pulled per iteration
    pub batch_size: usize,
    /// Sliding window size for edge inference
    pub window_size: usize,
    /// Fractional overlap between consecutive windows
    pub window_overlap: f64,
    /// Minimum edge confidence kept from inference and used for clustering
    pub min_confidence: f64,
    /// Clusters below this size are dropped
    pub min_group_size: usize,
    /// Cosine threshold for the near-duplicate detector
    pub duplicate_similarity: f32,
    /// Cosine threshold for SIMILAR_TO links between traces
    pub similar_trace_threshold: f32,
    /// Activation assigned to a freshly materialized trace
    pub initial_activation: f64,
}

impl Default for ConsolidateParams {
    fn default() -> Self {
        Self {
            batch_size: 500,
            window_size: 20,
            window_overlap: 0.5,
            min_confidence: 0.7,
            min_group_size: 1,
            duplicate_similarity: 0.95,
            similar_trace_threshold: 0.85,
            initial_activation: 0.1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    from_id: String,
    to_id: String,
    #[serde(default)]
    relationship: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct EdgeList {
    #[serde(default)]
    edges: Vec<RawEdge>,
}

/// Window after materialization during which a trace may still be merged
/// with new context.
const LABILE_WINDOW_HOURS: i64 = 1;

#[derive(Debug, Clone)]
struct CandidateEdge {
    from_id: String,
    to_id: String,
    edge_type: &'static str,
    relationship: String,
    confidence: f64,
}

/// The consolidation engine. Only one run executes at a time.
pub struct Consolidator {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    compressor: Arc<Compressor>,
    params: ConsolidateParams,
    running: AtomicBool,
}

impl Consolidator {
    /// Create a consolidator.
    pub fn new(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        compressor: Arc<Compressor>,
        params: ConsolidateParams,
    ) -> Self {
        Self {
            store,
            model,
            compressor,
            params,
            running: AtomicBool::new(false),
        }
    }

    /// Whether a run is currently executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Process unconsolidated episodes in batches until none remain.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ConsolidationReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Consolidation already in progress; skipping");
            return Ok(ConsolidationReport::default());
        }
        let result = self.run_inner(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<ConsolidationReport> {
        let mut total = ConsolidationReport::default();
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            let batch = self
                .store
                .get_unconsolidated_episodes(self.params.batch_size)?;
            if batch.is_empty() {
                break;
            }
            let was_full = batch.len() == self.params.batch_size;
            let report = self.process_batch(batch, cancel).await?;
            let progressed = report.traces_created > 0 || report.ephemeral_skips > 0;
            total.absorb(&report);
            if !was_full {
                break;
            }
            if !progressed {
                tracing::warn!("Full batch made no progress; stopping run");
                break;
            }
        }
        tracing::info!(
            episodes = total.episodes_scanned,
            traces = total.traces_created,
            ephemeral = total.ephemeral_skips,
            "Consolidation run complete"
        );
        Ok(total)
    }

    async fn process_batch(
        &self,
        mut episodes: Vec<Episode>,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationReport> {
        let start = Instant::now();
        let mut report = ConsolidationReport {
            episodes_scanned: episodes.len() as i64,
            ..Default::default()
        };

        episodes.sort_by_key(|e| e.occurred_at);
        let episode_ids: Vec<String> = episodes.iter().map(|e| e.id.clone()).collect();

        // Phase 0: near-duplicate detection over embeddings
        let mut edges = self.detect_duplicates(&episodes)?;
        report.duplicate_edges = edges.len() as i64;

        // Phase 1: LLM edge inference over sliding windows of L16 summaries
        let (inferred, skipped) = self.infer_edges(&episodes, cancel).await?;
        report.inferred_edges = inferred.len() as i64;
        report.windows_skipped = skipped;
        edges.extend(inferred);

        for edge in &edges {
            self.store.add_episode_edge(
                &edge.from_id,
                &edge.to_id,
                edge.edge_type,
                &edge.relationship,
                edge.confidence,
                edge.confidence,
            )?;
        }

        // Phase 2: connected components over all persisted edges in the batch
        let groups = self.cluster(&episodes, &episode_ids)?;
        report.clusters_formed = groups.len() as i64;

        let mentions = self.store.mentions_for_episodes(&episode_ids)?;

        // Phase 3: materialize each cluster
        for group in groups {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            let entity_union: BTreeSet<String> = group
                .iter()
                .filter_map(|e| mentions.get(&e.id))
                .flatten()
                .cloned()
                .collect();
            match self.materialize(&group, &entity_union).await {
                Ok(Materialized::Trace { similarity_links }) => {
                    report.traces_created += 1;
                    report.similarity_links += similarity_links;
                }
                Ok(Materialized::Ephemeral) => report.ephemeral_skips += 1,
                Err(e) => {
                    tracing::warn!(
                        "Skipping cluster of {} episodes after failure: {}",
                        group.len(),
                        e
                    );
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as i64;
        Ok(report)
    }

    /// Phase 0: for each pair with embeddings, cosine >= threshold plus L16
    /// prefix containment emits a duplicate edge from the later episode to
    /// the earlier one.
    fn detect_duplicates(&self, episodes: &[Episode]) -> Result<Vec<CandidateEdge>> {
        let ids: Vec<String> = episodes.iter().map(|e| e.id.clone()).collect();
        let embeddings = self.store.get_episode_embeddings(&ids)?;
        let mut edges = Vec::new();

        for i in 0..embeddings.len() {
            for j in (i + 1)..embeddings.len() {
                let (id_a, vec_a) = &embeddings[i];
                let (id_b, vec_b) = &embeddings[j];
                let sim = vector::cosine_similarity(vec_a, vec_b);
                if sim < self.params.duplicate_similarity {
                    continue;
                }
                let Some(sum_a) = self.store.episode_summary_at(id_a, 16)? else {
                    continue;
                };
                let Some(sum_b) = self.store.episode_summary_at(id_b, 16)? else {
                    continue;
                };
                let a = sum_a.text.to_lowercase();
                let b = sum_b.text.to_lowercase();
                let prefix_a: String = a.chars().take(20).collect();
                let prefix_b: String = b.chars().take(20).collect();
                if !a.contains(&prefix_b) && !b.contains(&prefix_a) {
                    continue;
                }
                // Later episode points at the earlier one
                let a_at = episodes.iter().find(|e| &e.id == id_a).map(|e| e.occurred_at);
                let b_at = episodes.iter().find(|e| &e.id == id_b).map(|e| e.occurred_at);
                let (from, to) = if a_at >= b_at {
                    (id_a.clone(), id_b.clone())
                } else {
                    (id_b.clone(), id_a.clone())
                };
                edges.push(CandidateEdge {
                    from_id: from,
                    to_id: to,
                    edge_type: "duplicate_of",
                    relationship: "near-duplicate content".to_string(),
                    confidence: sim as f64,
                });
            }
        }
        Ok(edges)
    }

    /// Phase 1: slide a window over the time-sorted episodes that have L16
    /// summaries and ask the model for related pairs. A window whose output
    /// does not parse is logged and skipped.
    async fn infer_edges(
        &self,
        episodes: &[Episode],
        cancel: &CancellationToken,
    ) -> Result<(Vec<CandidateEdge>, i64)> {
        let mut with_summaries = Vec::new();
        for episode in episodes {
            if let Some(summary) = self.store.episode_summary_at(&episode.id, 16)? {
                with_summaries.push((episode, summary.text));
            }
        }
        if with_summaries.len() < 2 {
            return Ok((Vec::new(), 0));
        }

        let id_set: BTreeSet<&str> = episodes.iter().map(|e| e.id.as_str()).collect();
        let window = self.params.window_size;
        let step = std::cmp::max(
            1,
            (window as f64 * (1.0 - self.params.window_overlap)) as usize,
        );

        let mut edges = Vec::new();
        let mut skipped = 0i64;
        let mut start = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Canceled);
            }
            let end = std::cmp::min(start + window, with_summaries.len());
            let slice = &with_summaries[start..end];
            if slice.len() >= 2 {
                match self.infer_window(slice).await {
                    Ok(window_edges) => {
                        for edge in window_edges {
                            if edge.confidence >= self.params.min_confidence
                                && id_set.contains(edge.from_id.as_str())
                                && id_set.contains(edge.to_id.as_str())
                                && edge.from_id != edge.to_id
                            {
                                edges.push(CandidateEdge {
                                    from_id: edge.from_id,
                                    to_id: edge.to_id,
                                    edge_type: "RELATED_TO",
                                    relationship: edge.relationship,
                                    confidence: edge.confidence,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Edge inference window failed: {}; skipping", e);
                        skipped += 1;
                    }
                }
            }
            if end >= with_summaries.len() {
                break;
            }
            start += step;
        }
        Ok((edges, skipped))
    }

    async fn infer_window(&self, window: &[(&Episode, String)]) -> Result<Vec<RawEdge>> {
        let mut listing = String::new();
        for (episode, summary) in window {
            listing.push_str(&format!(
                "- id={} author={} time={}: {}\n",
                episode.id,
                episode.author,
                episode.occurred_at.to_rfc3339(),
                summary
            ));
        }
        let prompt = format!(
            "You are linking related conversation episodes in a memory graph.\n\n\
             Episodes:\n{}\n\
             Identify pairs that are semantically related: same topic, a continuation, \
             cause and effect, or question and answer.\n\n\
             Return only JSON, no commentary:\n\
             {{\"edges\":[{{\"from_id\":\"...\",\"to_id\":\"...\",\"relationship\":\"...\",\"confidence\":0.0}}]}}\n\
             Only include edges with confidence >= 0.7.",
            listing
        );
        let output = self.model.generate(&prompt).await?;
        let parsed: EdgeList = parse_json_block(&output).map_err(EngineError::Parse)?;
        Ok(parsed.edges)
    }

    /// Phase 2: DFS connected components over the batch's persisted edges
    /// at or above the confidence floor. Deterministic: adjacency and visit
    /// order are both sorted.
    fn cluster(&self, episodes: &[Episode], episode_ids: &[String]) -> Result<Vec<Vec<Episode>>> {
        let stored_edges = self.store.edges_within_episodes(episode_ids)?;
        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for id in episode_ids {
            adjacency.entry(id.as_str()).or_default();
        }
        for edge in &stored_edges {
            if edge.confidence < self.params.min_confidence {
                continue;
            }
            adjacency
                .entry(edge.from_id.as_str())
                .or_default()
                .insert(edge.to_id.as_str());
            adjacency
                .entry(edge.to_id.as_str())
                .or_default()
                .insert(edge.from_id.as_str());
        }

        let by_id: BTreeMap<&str, &Episode> =
            episodes.iter().map(|e| (e.id.as_str(), e)).collect();
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut groups = Vec::new();

        for id in episode_ids {
            let id = id.as_str();
            if visited.contains(id) {
                continue;
            }
            let mut component = Vec::new();
            let mut stack = vec![id];
            while let Some(node) = stack.pop() {
                if !visited.insert(node) {
                    continue;
                }
                if let Some(episode) = by_id.get(node) {
                    component.push((*episode).clone());
                }
                if let Some(neighbors) = adjacency.get(node) {
                    for neighbor in neighbors {
                        if !visited.contains(neighbor) {
                            stack.push(neighbor);
                        }
                    }
                }
            }
            if component.len() >= self.params.min_group_size {
                component.sort_by_key(|e| e.occurred_at);
                groups.push(component);
            }
        }
        Ok(groups)
    }

    /// Phase 3 for one cluster.
    async fn materialize(
        &self,
        group: &[Episode],
        entity_union: &BTreeSet<String>,
    ) -> Result<Materialized> {
        let fragments: Vec<String> = group
            .iter()
            .map(|e| format!("{}: {}", e.author, e.content))
            .collect();

        let summary = match self.model.summarize(&fragments).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Cluster summarization failed: {}; using truncation", e);
                fragments.join(" ").chars().take(300).collect()
            }
        };
        let summary = summary
            .strip_prefix("[Past] ")
            .unwrap_or(&summary)
            .to_string();

        if is_ephemeral(&summary, group) {
            for episode in group {
                self.store.link_trace_source(EPHEMERAL_TRACE_ID, &episode.id)?;
            }
            tracing::debug!("Skipped ephemeral cluster of {} episodes", group.len());
            return Ok(Materialized::Ephemeral);
        }

        let now = Utc::now();
        let trace_id = ids::trace_id(
            now.timestamp_nanos_opt().unwrap_or_default(),
            &group[0].id,
        );

        // Embed the summary; fall back to the centroid of source embeddings
        let embedding = match self.model.embed(&summary).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                tracing::warn!("Trace embedding failed: {}; trying centroid", e);
                let ids: Vec<String> = group.iter().map(|e| e.id.clone()).collect();
                let source_vecs: Vec<Vec<f32>> = self
                    .store
                    .get_episode_embeddings(&ids)?
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect();
                vector::centroid(&source_vecs)
            }
        };

        let trace = Trace {
            id: trace_id.clone(),
            summary: summary.clone(),
            topic: None,
            trace_type: classify_trace(&summary, group),
            activation: self.params.initial_activation,
            strength: group.len() as i64,
            created_at: now,
            last_accessed: now,
            labile_until: Some(now + chrono::Duration::hours(LABILE_WINDOW_HOURS)),
            has_embedding: false,
        };
        self.store.insert_trace(&trace)?;

        for episode in group {
            self.store.link_trace_source(&trace_id, &episode.id)?;
        }
        for entity_id in entity_union {
            self.store.link_trace_entity(&trace_id, entity_id)?;
        }

        if let Some(vec) = &embedding {
            self.store.set_trace_embedding(&trace_id, vec)?;
        }

        // Cascaded pyramid; regenerable from sources, so failures are soft
        self.compressor
            .trace_pyramid(&self.store, &trace_id, &fragments)
            .await?;

        // Link to similar traces
        let mut similarity_links = 0i64;
        if let Some(vec) = &embedding {
            let mut normalized = vec.clone();
            vector::l2_normalize(&mut normalized);
            let similar = self.store.similar_traces(
                &normalized,
                10,
                self.params.similar_trace_threshold,
            )?;
            for (other_id, sim) in similar {
                if other_id == trace_id {
                    continue;
                }
                self.store
                    .add_trace_relation(&trace_id, &other_id, "SIMILAR_TO", sim as f64)?;
                similarity_links += 1;
            }
        }

        tracing::debug!(
            trace = %trace_id,
            sources = group.len(),
            kind = %trace.trace_type,
            "Materialized trace"
        );
        Ok(Materialized::Trace { similarity_links })
    }
}

enum Materialized {
    Trace { similarity_links: i64 },
    Ephemeral,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModel;
    use crate::model::EpisodeInput;
    use crate::pyramid::CompressorOptions;
    use chrono::Duration;

    fn setup(params: ConsolidateParams) -> (Arc<Store>, Arc<MockModel>, Consolidator) {
        let store = Arc::new(Store::open_in_memory(8).unwrap());
        let model: Arc<MockModel> = Arc::new(MockModel::new(8));
        let compressor = Arc::new(Compressor::new(
            model.clone(),
            CompressorOptions::default(),
        ));
        let consolidator = Consolidator::new(
            Arc::clone(&store),
            model.clone(),
            compressor,
            params,
        );
        (store, model, consolidator)
    }

    async fn add_episode_with_pyramid(
        store: &Store,
        model: &MockModel,
        id: &str,
        content: &str,
        minutes: i64,
    ) {
        let episode = store
            .add_episode(&EpisodeInput {
                id: id.to_string(),
                content: content.to_string(),
                author: "Bud".to_string(),
                channel: "general".to_string(),
                occurred_at: Some(chrono::Utc::now() + Duration::minutes(minutes)),
                ..Default::default()
            })
            .unwrap();
        let embedding = model.embed(content).await.unwrap();
        store.set_episode_embedding(id, &embedding).unwrap();
        let compressor = Compressor::new(
            Arc::new(MockModel::new(8)),
            CompressorOptions::default(),
        );
        compressor
            .episode_pyramid(store, &episode, &crate::pyramid::LEVELS)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn three_related_episodes_form_one_trace() {
        let (store, model, consolidator) = setup(ConsolidateParams {
            min_group_size: 2,
            ..Default::default()
        });

        add_episode_with_pyramid(&store, &model, "ep-1", "we should use postgres for this", 0).await;
        add_episode_with_pyramid(&store, &model, "ep-2", "postgres has better json support", 5).await;
        add_episode_with_pyramid(&store, &model, "ep-3", "agreed, migrating to postgres", 10).await;

        model.push_response(
            r#"{"edges":[
                {"from_id":"ep-1","to_id":"ep-2","relationship":"continuation","confidence":0.9},
                {"from_id":"ep-2","to_id":"ep-3","relationship":"continuation","confidence":0.8}
            ]}"#,
        );

        let cancel = CancellationToken::new();
        let report = consolidator.run(&cancel).await.unwrap();
        assert_eq!(report.traces_created, 1);

        let trace_ids = store.all_trace_ids().unwrap();
        assert_eq!(trace_ids.len(), 1);
        let trace = store.get_trace(&trace_ids[0]).unwrap().unwrap();
        assert_eq!(trace.strength, 3);

        let sources = store.trace_sources(&trace_ids[0]).unwrap();
        assert_eq!(sources.len(), 3);
        // All three consumed from the backlog
        assert_eq!(store.count_unconsolidated_episodes().unwrap(), 0);
    }

    #[tokio::test]
    async fn rerun_with_no_new_episodes_is_idempotent() {
        let (store, model, consolidator) = setup(ConsolidateParams {
            min_group_size: 2,
            ..Default::default()
        });

        add_episode_with_pyramid(&store, &model, "ep-1", "first message about databases", 0).await;
        add_episode_with_pyramid(&store, &model, "ep-2", "second message about databases", 5).await;
        model.push_response(
            r#"{"edges":[{"from_id":"ep-1","to_id":"ep-2","relationship":"same topic","confidence":0.9}]}"#,
        );

        let cancel = CancellationToken::new();
        consolidator.run(&cancel).await.unwrap();
        let count_after_first = store.all_trace_ids().unwrap().len();

        let report = consolidator.run(&cancel).await.unwrap();
        assert_eq!(report.traces_created, 0);
        assert_eq!(store.all_trace_ids().unwrap().len(), count_after_first);
    }

    #[tokio::test]
    async fn ephemeral_countdown_links_to_sentinel() {
        let (store, model, consolidator) = setup(ConsolidateParams::default());

        add_episode_with_pyramid(
            &store,
            &model,
            "ep-meet",
            "Meeting in 5 minutes and 30 seconds",
            0,
        )
        .await;

        let cancel = CancellationToken::new();
        let report = consolidator.run(&cancel).await.unwrap();
        assert_eq!(report.traces_created, 0);
        assert_eq!(report.ephemeral_skips, 1);
        assert!(store.all_trace_ids().unwrap().is_empty());

        let sentinel_sources = store.trace_sources(EPHEMERAL_TRACE_ID).unwrap();
        assert_eq!(sentinel_sources, vec!["ep-meet".to_string()]);
        // Not reconsidered on the next run
        assert_eq!(store.count_unconsolidated_episodes().unwrap(), 0);
    }

    #[tokio::test]
    async fn parse_failure_skips_window_not_batch() {
        let (store, model, consolidator) = setup(ConsolidateParams::default());

        add_episode_with_pyramid(&store, &model, "ep-1", "alpha topic message one here", 0).await;
        add_episode_with_pyramid(&store, &model, "ep-2", "beta topic message two here", 5).await;
        model.push_response("not json at all, the model had a bad day");

        let cancel = CancellationToken::new();
        let report = consolidator.run(&cancel).await.unwrap();
        assert_eq!(report.windows_skipped, 1);
        // Singleton clusters still materialize
        assert_eq!(report.traces_created, 2);
    }

    #[tokio::test]
    async fn duplicate_detection_requires_summary_overlap() {
        let (store, model, consolidator) = setup(ConsolidateParams {
            min_group_size: 2,
            ..Default::default()
        });

        // Identical embeddings, disjoint summaries: no duplicate edge
        store
            .add_episode(&EpisodeInput {
                id: "ep-a".to_string(),
                content: "first completely distinct text".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .add_episode(&EpisodeInput {
                id: "ep-b".to_string(),
                content: "second entirely different words".to_string(),
                ..Default::default()
            })
            .unwrap();
        let same = vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        store.set_episode_embedding("ep-a", &same).unwrap();
        store.set_episode_embedding("ep-b", &same).unwrap();
        for (id, text) in [("ep-a", "first completely distinct text"), ("ep-b", "second entirely different words")] {
            store
                .put_episode_summary(&crate::model::Summary {
                    owner_id: id.to_string(),
                    level: 16,
                    text: text.to_string(),
                    est_tokens: 4,
                })
                .unwrap();
        }

        let episodes = store.get_unconsolidated_episodes(10).unwrap();
        let edges = consolidator.detect_duplicates(&episodes).unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn duplicate_detection_emits_edge_on_overlap() {
        let (store, _model, consolidator) = setup(ConsolidateParams::default());

        store
            .add_episode(&EpisodeInput {
                id: "ep-a".to_string(),
                content: "deploy finished for api".to_string(),
                occurred_at: Some(chrono::Utc::now()),
                ..Default::default()
            })
            .unwrap();
        store
            .add_episode(&EpisodeInput {
                id: "ep-b".to_string(),
                content: "deploy finished for api again".to_string(),
                occurred_at: Some(chrono::Utc::now() + Duration::minutes(1)),
                ..Default::default()
            })
            .unwrap();
        let same = vec![0.0f32, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        store.set_episode_embedding("ep-a", &same).unwrap();
        store.set_episode_embedding("ep-b", &same).unwrap();
        for id in ["ep-a", "ep-b"] {
            store
                .put_episode_summary(&crate::model::Summary {
                    owner_id: id.to_string(),
                    level: 16,
                    text: "deploy finished for api".to_string(),
                    est_tokens: 4,
                })
                .unwrap();
        }

        let episodes = store.get_unconsolidated_episodes(10).unwrap();
        let edges = consolidator.detect_duplicates(&episodes).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, "duplicate_of");
        // Later episode points at the earlier one
        assert_eq!(edges[0].from_id, "ep-b");
        assert_eq!(edges[0].to_id, "ep-a");
    }

    #[tokio::test]
    async fn cancellation_surfaces_canceled() {
        let (_store, _model, consolidator) = setup(ConsolidateParams::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = consolidator.run(&cancel).await;
        assert!(matches!(result, Err(EngineError::Canceled)));
    }
}
