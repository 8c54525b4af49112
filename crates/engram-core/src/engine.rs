//! Engine facade
//!
//! The surface hosts consume: ingest episodes, retrieve memories, trigger
//! consolidation and decay. Wires the store, gateway, pyramid, extractor,
//! consolidator, activation and decay engines together behind one handle.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::activation::{ActivationEngine, ActivationParams};
use crate::consolidate::{ConsolidateParams, Consolidator};
use crate::decay::{DecayEngine, DecayParams};
use crate::error::Result;
use crate::extract::{EntityCache, EntityExtractor};
use crate::llm::LanguageModel;
use crate::model::{
    ConsolidationReport, DecayReport, Episode, EpisodeInput, MemoryStats, RetrievedTrace,
};
use crate::pyramid::{Compressor, CompressorOptions, LEVELS};
use crate::store::Store;

/// Engine-wide configuration. Hosts construct this directly; there is no
/// config-file layer in the core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// State directory holding `memory.db`; platform default when `None`
    pub state_dir: Option<PathBuf>,
    /// Embedding dimension of the gateway model; fixed per database
    pub embedding_dim: usize,
    /// Retrieval hyperparameters
    pub activation: ActivationParams,
    /// Consolidation thresholds
    pub consolidation: ConsolidateParams,
    /// Decay tuning
    pub decay: DecayParams,
    /// Model names for the language-drift fallback
    pub compressor: CompressorOptions,
    /// Cosine threshold for attaching a new episode to an existing trace
    pub trace_attach_threshold: f32,
    /// Unconsolidated-episode count at which hosts should trigger a run
    pub consolidation_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            embedding_dim: 768,
            activation: ActivationParams::default(),
            consolidation: ConsolidateParams::default(),
            decay: DecayParams::default(),
            compressor: CompressorOptions::default(),
            trace_attach_threshold: 0.80,
            consolidation_threshold: 50,
        }
    }
}

/// The cognitive memory engine.
pub struct MemoryEngine {
    store: Arc<Store>,
    model: Arc<dyn LanguageModel>,
    compressor: Arc<Compressor>,
    extractor: EntityExtractor,
    consolidator: Consolidator,
    activation: ActivationEngine,
    decay: DecayEngine,
    config: EngineConfig,
}

impl MemoryEngine {
    /// Open (or create) the store and assemble the engine.
    pub fn open(config: EngineConfig, model: Arc<dyn LanguageModel>) -> Result<Self> {
        let store = Arc::new(Store::open(config.state_dir.clone(), config.embedding_dim)?);
        Ok(Self::assemble(store, model, config))
    }

    /// Assemble the engine over an already-open store (tests, embedding the
    /// engine in a host that owns the store lifecycle).
    pub fn with_store(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        config: EngineConfig,
    ) -> Self {
        Self::assemble(store, model, config)
    }

    fn assemble(store: Arc<Store>, model: Arc<dyn LanguageModel>, config: EngineConfig) -> Self {
        let compressor = Arc::new(Compressor::new(
            Arc::clone(&model),
            config.compressor.clone(),
        ));
        let extractor = EntityExtractor::new(Arc::clone(&store), Arc::clone(&model));
        let consolidator = Consolidator::new(
            Arc::clone(&store),
            Arc::clone(&model),
            Arc::clone(&compressor),
            config.consolidation.clone(),
        );
        let cache = Arc::new(EntityCache::new());
        let activation = ActivationEngine::new(
            Arc::clone(&store),
            cache,
            config.activation.clone(),
        );
        let decay = DecayEngine::new(Arc::clone(&store), config.decay.clone());
        Self {
            store,
            model,
            compressor,
            extractor,
            consolidator,
            activation,
            decay,
            config,
        }
    }

    /// The underlying store (read-side helpers for hosts).
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ingest one episode: upsert, reply edge, embedding (once), pyramid,
    /// entity extraction, and attachment to similar existing traces. Gateway
    /// failures degrade individual stages; the episode itself always lands.
    pub async fn add_episode(&self, input: EpisodeInput) -> Result<Episode> {
        let episode = self.store.add_episode(&input)?;

        if let Some(reply_to) = &episode.reply_to {
            self.store
                .add_episode_edge(&episode.id, reply_to, "REPLIES_TO", "", 1.0, 1.0)?;
        }

        // Embedding is filled once, never rewritten
        let mut embedding = None;
        if episode.has_embedding {
            embedding = self.store.get_episode_embedding(&episode.id)?;
        } else {
            match self.model.embed(&episode.content).await {
                Ok(vec) => {
                    self.store.set_episode_embedding(&episode.id, &vec)?;
                    embedding = self.store.get_episode_embedding(&episode.id)?;
                }
                Err(e) => {
                    tracing::warn!("Embedding failed for {}: {}", episode.id, e)
                }
            }
        }

        // Missing pyramid levels only; a backfill run fills in the rest
        let existing = self.store.episode_summary_levels(&episode.id)?;
        let missing: Vec<u8> = LEVELS
            .iter()
            .copied()
            .filter(|l| !existing.contains(l))
            .collect();
        if !missing.is_empty() {
            self.compressor
                .episode_pyramid(&self.store, &episode, &missing)
                .await?;
        }

        if let Err(e) = self.extractor.process_episode(&episode).await {
            tracing::warn!("Entity extraction failed for {}: {}", episode.id, e);
        }

        // Attach to existing similar traces (the episode has no primary
        // trace yet, so every match qualifies)
        if let Some(vec) = &embedding {
            let similar =
                self.store
                    .similar_traces(vec, 5, self.config.trace_attach_threshold)?;
            for (trace_id, sim) in similar {
                self.store.add_episode_trace_edge(
                    &episode.id,
                    &trace_id,
                    &format!("semantic match {:.2}", sim),
                )?;
            }
        }

        Ok(episode)
    }

    /// Ranked retrieval for a query embedding and text.
    pub async fn retrieve(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedTrace>> {
        self.activation
            .retrieve(query_embedding, query_text, limit, cancel)
            .await
    }

    /// Ranked retrieval with explicit context seed traces.
    pub async fn retrieve_with_context(
        &self,
        query_embedding: &[f32],
        query_text: &str,
        context_trace_ids: &[String],
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedTrace>> {
        self.activation
            .retrieve_with_context(query_embedding, query_text, context_trace_ids, limit, cancel)
            .await
    }

    /// Boost traces that were actually shown to the user.
    pub fn mark_shown(&self, trace_ids: &[String]) {
        self.decay.boost_accessed(trace_ids);
    }

    /// Whether the unconsolidated backlog has crossed the trigger threshold.
    pub fn should_consolidate(&self) -> Result<bool> {
        Ok(self.store.count_unconsolidated_episodes()? as usize
            >= self.config.consolidation_threshold)
    }

    /// Run consolidation until the backlog is drained.
    pub async fn consolidate(&self, cancel: &CancellationToken) -> Result<ConsolidationReport> {
        self.consolidator.run(cancel).await
    }

    /// One age-decay tick.
    pub fn decay_tick(&self) -> Result<DecayReport> {
        self.decay.tick()
    }

    /// Reinforce a trace on re-observation.
    pub fn reinforce(&self, trace_id: &str, new_embedding: &[f32]) -> Result<()> {
        self.decay.reinforce(trace_id, new_embedding)
    }

    /// System statistics snapshot.
    pub fn stats(&self) -> Result<MemoryStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModel;

    fn engine() -> MemoryEngine {
        let store = Arc::new(Store::open_in_memory(8).unwrap());
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::new(8));
        MemoryEngine::with_store(
            store,
            model,
            EngineConfig {
                embedding_dim: 8,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn ingest_fills_pyramid_and_embedding() {
        let engine = engine();
        let episode = engine
            .add_episode(EpisodeInput {
                id: "ep-1".to_string(),
                content: "Bud: hi there".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(engine.store().get_episode_embedding(&episode.id).unwrap().is_some());
        for level in LEVELS {
            let summary = engine
                .store()
                .episode_summary_at("ep-1", level)
                .unwrap()
                .unwrap();
            assert_eq!(summary.text, "hi there");
        }
    }

    #[tokio::test]
    async fn reply_to_creates_edge() {
        let engine = engine();
        engine
            .add_episode(EpisodeInput {
                id: "ep-1".to_string(),
                content: "question?".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        engine
            .add_episode(EpisodeInput {
                id: "ep-2".to_string(),
                content: "answer!".to_string(),
                reply_to: Some("ep-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let edges = engine
            .store()
            .edges_within_episodes(&["ep-1".to_string(), "ep-2".to_string()])
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, "REPLIES_TO");
    }

    #[tokio::test]
    async fn should_consolidate_tracks_backlog() {
        let engine = engine();
        assert!(!engine.should_consolidate().unwrap());
        for i in 0..50 {
            engine
                .add_episode(EpisodeInput {
                    id: format!("ep-{}", i),
                    content: format!("message number {}", i),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        assert!(engine.should_consolidate().unwrap());
    }

    #[tokio::test]
    async fn redelivery_does_not_regenerate() {
        let engine = engine();
        let input = EpisodeInput {
            id: "ep-1".to_string(),
            content: "Bud: hi there".to_string(),
            ..Default::default()
        };
        engine.add_episode(input.clone()).await.unwrap();
        let first = engine.store().get_episode_embedding("ep-1").unwrap().unwrap();

        engine.add_episode(input).await.unwrap();
        let second = engine.store().get_episode_embedding("ep-1").unwrap().unwrap();
        assert_eq!(first, second);
    }
}
