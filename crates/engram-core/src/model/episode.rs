//! Episodes - the immutable unit of ingest
//!
//! An episode is one raw message. Content never changes after ingest; the
//! embedding is filled once; the core never deletes episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// One raw, immutable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    /// Opaque ID assigned by the host ingest adapter
    pub id: String,
    /// Raw message content (immutable)
    pub content: String,
    /// Ingest source (chat adapter, import, ...)
    pub source: String,
    /// Message author display name
    pub author: String,
    /// Channel / room the message arrived in
    pub channel: String,
    /// Event time (when the message happened)
    pub occurred_at: DateTime<Utc>,
    /// Ingest time (when the core stored it)
    pub ingested_at: DateTime<Utc>,
    /// Dialogue act label supplied by the attention layer, if any
    pub dialogue_act: Option<String>,
    /// Information-density score supplied by the attention layer
    pub entropy_score: f64,
    /// Token count estimate supplied at ingest
    pub token_count: i64,
    /// ID of the episode this one replies to, if any
    pub reply_to: Option<String>,
    /// Whether an embedding has been stored for this episode
    pub has_embedding: bool,
}

impl Episode {
    /// 5-character display ID derived from the full ID.
    pub fn short_id(&self) -> String {
        ids::short_id(&self.id)
    }
}

/// Host-supplied input for ingesting an episode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeInput {
    /// Opaque episode ID (host-minted; stable across re-delivery)
    pub id: String,
    /// Raw message content
    pub content: String,
    /// Ingest source
    #[serde(default)]
    pub source: String,
    /// Author display name
    #[serde(default)]
    pub author: String,
    /// Channel name
    #[serde(default)]
    pub channel: String,
    /// Event time; defaults to ingest time when absent
    pub occurred_at: Option<DateTime<Utc>>,
    /// Dialogue act label
    pub dialogue_act: Option<String>,
    /// Information-density score
    #[serde(default)]
    pub entropy_score: f64,
    /// Token count estimate
    #[serde(default)]
    pub token_count: i64,
    /// Episode this message replies to
    pub reply_to: Option<String>,
}

/// A stored pyramid summary for an episode or trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Owning episode or trace ID
    pub owner_id: String,
    /// Word budget level: 4, 8, 16, 32 or 64
    pub level: u8,
    /// Summary text (at most `level` words)
    pub text: String,
    /// Estimated token count (`max(1, bytes/4)`)
    pub est_tokens: i64,
}

/// A semantic edge between two episodes, inferred during consolidation or by
/// the near-duplicate detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeEdge {
    /// Row ID
    pub id: i64,
    /// Source episode
    pub from_id: String,
    /// Target episode
    pub to_id: String,
    /// Edge kind: `RELATED_TO`, `REPLIES_TO`, `duplicate_of`, ...
    pub edge_type: String,
    /// Free-form semantic description of the relationship
    pub relationship: String,
    /// Inference confidence in [0, 1]
    pub confidence: f64,
    /// Edge weight used by downstream consumers
    pub weight: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
