//! Traces - consolidated long-term memories
//!
//! A trace distills a cluster of episodes. Its activation is the engine's
//! estimate of current retrievability: decayed by age, boosted on access,
//! spread across the trace graph at query time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// Reserved trace ID marking low-value episodes as consolidated-but-skipped.
/// It is a sentinel string, not a trace row; linking episodes to it prevents
/// the consolidator from reconsidering them.
pub const EPHEMERAL_TRACE_ID: &str = "_ephemeral";

/// Kind of long-term memory a trace holds.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TraceType {
    /// Facts, decisions, preferences - the default, retained kind
    #[default]
    Knowledge,
    /// Transient system activity (reminders, deploys, state syncs);
    /// decays 3x faster and is down-weighted for non-status queries
    Operational,
}

impl TraceType {
    /// Canonical string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceType::Knowledge => "knowledge",
            TraceType::Operational => "operational",
        }
    }

    /// Parse from the stored string; unknown values default to knowledge.
    pub fn parse_name(s: &str) -> Self {
        match s {
            "operational" => TraceType::Operational,
            _ => TraceType::Knowledge,
        }
    }
}

impl std::fmt::Display for TraceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A consolidated long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    /// Trace ID (`trace-<nanos>-<episode prefix>`)
    pub id: String,
    /// Base summary distilled from the source episodes
    pub summary: String,
    /// Short topic label, when one was derived
    pub topic: Option<String>,
    /// Knowledge or operational
    pub trace_type: TraceType,
    /// Current retrievability in [0, 1]
    pub activation: f64,
    /// Consolidation strength; starts at the source count, +1 per reinforcement
    pub strength: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last time the trace was shown to the user
    pub last_accessed: DateTime<Utc>,
    /// Reconsolidation window end, when the trace is still malleable
    pub labile_until: Option<DateTime<Utc>>,
    /// Whether an embedding has been stored
    pub has_embedding: bool,
}

impl Trace {
    /// 5-character display ID derived from the full ID.
    pub fn short_id(&self) -> String {
        ids::short_id(&self.id)
    }
}

/// A symmetric relation between traces (stored once, queried both ways).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRelation {
    /// Row ID
    pub id: i64,
    /// One endpoint
    pub from_id: String,
    /// Other endpoint
    pub to_id: String,
    /// Relation kind, e.g. `SIMILAR_TO`
    pub kind: String,
    /// Relation weight (cosine similarity for `SIMILAR_TO`)
    pub weight: f64,
}

/// A trace returned from retrieval, with its scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedTrace {
    /// The hydrated trace record
    pub trace: Trace,
    /// Activation after the spread loop and funnel rerank
    pub activation: f64,
    /// Activation after the operational-bias reweighting; results are
    /// ordered by this value descending
    pub adjusted_activation: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_type_roundtrip() {
        assert_eq!(TraceType::parse_name("knowledge"), TraceType::Knowledge);
        assert_eq!(TraceType::parse_name("operational"), TraceType::Operational);
        assert_eq!(TraceType::parse_name("anything"), TraceType::Knowledge);
    }
}
