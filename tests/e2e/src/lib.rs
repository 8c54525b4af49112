//! Shared harness for end-to-end scenario tests
//!
//! Builds a full engine over a temp-directory store and the deterministic
//! mock gateway. Each test gets an isolated database file; the tempdir is
//! dropped with the harness.

use std::sync::Arc;

use engram_core::llm::MockModel;
use engram_core::{EngineConfig, EpisodeInput, LanguageModel, MemoryEngine, Store};

/// One isolated engine instance over a temp store.
pub struct Harness {
    /// Keeps the state directory alive for the test's duration
    pub dir: tempfile::TempDir,
    /// The assembled engine
    pub engine: MemoryEngine,
    /// The mock gateway, for scripting responses and pinning embeddings
    pub model: Arc<MockModel>,
    /// Shared handle to the store underneath the engine
    pub store: Arc<Store>,
}

/// Build a harness with the given embedding dimension.
pub fn harness(embedding_dim: usize) -> Harness {
    harness_with_config(EngineConfig {
        embedding_dim,
        ..Default::default()
    })
}

/// Build a harness with a fully custom config (the embedding dimension in
/// the config is authoritative).
pub fn harness_with_config(config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().expect("create temp state dir");
    let store = Arc::new(
        Store::open(Some(dir.path().to_path_buf()), config.embedding_dim)
            .expect("open store"),
    );
    let model = Arc::new(MockModel::new(config.embedding_dim));
    let model_dyn: Arc<dyn LanguageModel> = model.clone();
    let engine = MemoryEngine::with_store(Arc::clone(&store), model_dyn, config);
    Harness {
        dir,
        engine,
        model,
        store,
    }
}

/// Minimal episode input with an event-time offset in minutes.
pub fn episode(id: &str, content: &str, minutes: i64) -> EpisodeInput {
    EpisodeInput {
        id: id.to_string(),
        content: content.to_string(),
        source: "test".to_string(),
        author: "Bud".to_string(),
        channel: "general".to_string(),
        occurred_at: Some(chrono::Utc::now() + chrono::Duration::minutes(minutes)),
        ..Default::default()
    }
}
