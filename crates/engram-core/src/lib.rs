//! # Engram Core
//!
//! Cognitive memory engine for conversational agents: an embedded,
//! graph-structured long-term store.
//!
//! - **Episodes**: raw messages are ingested as immutable episodes
//! - **Compression Pyramid**: every episode and trace carries summaries at
//!   word budgets 64 / 32 / 16 / 8 / 4, with an English-drift fallback
//! - **Knowledge Graph**: two-pass entity extraction, alias soft-merging,
//!   bitemporal relations with invalidation instead of deletion
//! - **Consolidation**: overlapping clusters of episodes become compact,
//!   drifting traces (duplicate detection, LLM edge inference, connected
//!   components, cascaded pyramids, similarity links)
//! - **Spreading Activation**: Synapse-style retrieval (decay + fan
//!   normalization + lateral inhibition + sigmoid firing) seeded by vector
//!   similarity, BM25 and entity mentions, funneled into a ranked result
//! - **Decay**: operational traces fade 3x faster than knowledge; access
//!   boosts and embedding EMA push back
//!
//! The store is single-process, single-writer, embedded (SQLite, WAL). LLM
//! generation, embedding and summarization come from a host-provided
//! gateway behind the [`LanguageModel`] trait; the engine assumes only a
//! fixed embedding dimension per database.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use engram_core::{EngineConfig, EpisodeInput, MemoryEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! let engine = MemoryEngine::open(EngineConfig::default(), gateway)?;
//!
//! // Ingest
//! engine.add_episode(EpisodeInput {
//!     id: "msg-123".into(),
//!     content: "Sarah: we're migrating to Postgres".into(),
//!     ..Default::default()
//! }).await?;
//!
//! // Consolidate when the backlog crosses the threshold
//! if engine.should_consolidate()? {
//!     engine.consolidate(&CancellationToken::new()).await?;
//! }
//!
//! // Retrieve
//! let hits = engine.retrieve(&query_embedding, "what database do we use?",
//!                            5, &CancellationToken::new()).await?;
//! ```

pub mod activation;
pub mod consolidate;
pub mod decay;
mod engine;
pub mod error;
pub mod extract;
pub mod ids;
pub mod llm;
pub mod model;
pub mod pyramid;
pub mod store;
pub mod vector;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use engine::{EngineConfig, MemoryEngine};
pub use error::{EngineError, Result};

pub use model::{
    ConsolidationReport, DecayReport, Entity, EntityKind, EntityRelation, Episode, EpisodeEdge,
    EpisodeInput, MemoryStats, RelationKind, RetrievedTrace, Summary, Trace, TraceRelation,
    TraceType, EPHEMERAL_TRACE_ID,
};

pub use activation::{ActivationEngine, ActivationParams};
pub use consolidate::{ConsolidateParams, Consolidator};
pub use decay::{DecayEngine, DecayParams};
pub use extract::{EntityCache, EntityExtractor, Resolver};
pub use llm::{LanguageModel, LlmError, MockModel};
pub use pyramid::{Compressor, CompressorOptions, LEVELS};
pub use store::Store;

#[cfg(feature = "http-gateway")]
pub use llm::HttpGateway;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ActivationParams, ConsolidateParams, DecayParams, EngineConfig, EngineError, Episode,
        EpisodeInput, LanguageModel, MemoryEngine, MemoryStats, Result, RetrievedTrace, Store,
        Trace, TraceType,
    };
}
