//! Core data model
//!
//! Episodes are the immutable unit of ingest, entities and relations form the
//! knowledge graph, and traces are the consolidated long-term memories that
//! retrieval operates over.

mod entity;
mod episode;
mod trace;

pub use entity::{Entity, EntityKind, EntityRelation, RelationKind};
pub use episode::{Episode, EpisodeEdge, EpisodeInput, Summary};
pub use trace::{RetrievedTrace, Trace, TraceRelation, TraceType, EPHEMERAL_TRACE_ID};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the memory system's size and health.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Total episodes ingested
    pub total_episodes: i64,
    /// Episodes not yet covered by a trace (or the ephemeral sentinel)
    pub unconsolidated_episodes: i64,
    /// Total traces
    pub total_traces: i64,
    /// Knowledge traces
    pub knowledge_traces: i64,
    /// Operational traces
    pub operational_traces: i64,
    /// Total canonical entities
    pub total_entities: i64,
    /// Active entity relations
    pub active_relations: i64,
    /// Mean trace activation
    pub average_activation: f64,
    /// Oldest episode event time
    pub oldest_episode: Option<DateTime<Utc>>,
    /// Newest episode event time
    pub newest_episode: Option<DateTime<Utc>>,
}

/// Accounting for one consolidation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    /// Episodes pulled from the unconsolidated backlog
    pub episodes_scanned: i64,
    /// Near-duplicate edges emitted by phase 0
    pub duplicate_edges: i64,
    /// Edges inferred by the LLM in phase 1
    pub inferred_edges: i64,
    /// Sliding windows skipped because the model output did not parse
    pub windows_skipped: i64,
    /// Connected components that met the minimum group size
    pub clusters_formed: i64,
    /// Traces materialized
    pub traces_created: i64,
    /// Clusters skipped through the ephemeral gate
    pub ephemeral_skips: i64,
    /// Similarity links inserted between traces
    pub similarity_links: i64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: i64,
}

impl ConsolidationReport {
    /// Fold another batch's report into this one.
    pub fn absorb(&mut self, other: &ConsolidationReport) {
        self.episodes_scanned += other.episodes_scanned;
        self.duplicate_edges += other.duplicate_edges;
        self.inferred_edges += other.inferred_edges;
        self.windows_skipped += other.windows_skipped;
        self.clusters_formed += other.clusters_formed;
        self.traces_created += other.traces_created;
        self.ephemeral_skips += other.ephemeral_skips;
        self.similarity_links += other.similarity_links;
        self.duration_ms += other.duration_ms;
    }
}

/// Accounting for one decay tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayReport {
    /// Traces whose activation was reduced
    pub traces_decayed: i64,
    /// Traces clamped to the activation floor
    pub traces_floored: i64,
    /// Wall-clock duration in milliseconds
    pub duration_ms: i64,
}
