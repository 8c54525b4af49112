//! Identifier derivation
//!
//! All derived identifiers are content-addressed with BLAKE3 so they are
//! stable across processes and databases. Short IDs are display-only;
//! collisions within a dataset are tolerated.

/// Length of a display short ID in hex characters.
pub const SHORT_ID_LEN: usize = 5;

/// Derive the 5-character display ID for an episode or trace.
pub fn short_id(full_id: &str) -> String {
    let hex = blake3::hash(full_id.as_bytes()).to_hex();
    hex[..SHORT_ID_LEN].to_string()
}

/// Mint a canonical entity ID from a (possibly mixed-case) name.
///
/// The ID is derived from the lowercased name so that "Sarah" and "sarah"
/// always mint the same entity.
pub fn entity_id(name: &str) -> String {
    let hex = blake3::hash(name.to_lowercase().as_bytes()).to_hex();
    format!("entity-{}", &hex[..8])
}

/// Mint a trace ID unique within the batch.
///
/// Nanosecond timestamps keep IDs monotonic within a consolidation run;
/// the episode prefix makes them greppable back to their cluster. Episode
/// IDs are arbitrary host strings, so the prefix is taken by chars.
pub fn trace_id(now_nanos: i64, first_episode_id: &str) -> String {
    let prefix: String = first_episode_id.chars().take(8).collect();
    format!("trace-{}-{}", now_nanos, prefix)
}
