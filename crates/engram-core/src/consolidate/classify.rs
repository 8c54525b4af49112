//! Trace-type classification and the ephemeral gate
//!
//! Rule tables, not inline string matches, so deployments can audit and
//! extend them. Knowledge markers win over operational markers: a deploy
//! note that records WHY something was done is a decision worth keeping.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{Episode, TraceType};

/// Markers of durable knowledge: decisions, causes, findings.
const KNOWLEDGE_MARKERS: &[&str] = &[
    "decided",
    "decision",
    "because",
    "finding",
    "found that",
    "root cause",
    "learned",
    "realized",
    "prefers",
    "agreed",
    "concluded",
    "turns out",
];

/// Markers of transient system activity: reminders, syncs, deploys,
/// past-tense status updates.
const OPERATIONAL_MARKERS: &[&str] = &[
    "reminder",
    "starts in",
    "starting in",
    "calendar",
    "standup",
    "state sync",
    "synced",
    "sync complete",
    "deployed",
    "deploy",
    "rolled out",
    "released",
    "merged",
    "pushed",
    "restarted",
    "rebooted",
    "status update",
];

/// Dialogue acts that mark an episode as contentless chatter.
const LOW_VALUE_ACTS: &[&str] = &["backchannel", "greeting"];

static COUNTDOWN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:starts? in|starting in|in \d+ (?:seconds?|minutes?|hours?))\b")
        .expect("static regex")
});

/// Maximum length for a summary to qualify as an ephemeral countdown.
const EPHEMERAL_MAX_LEN: usize = 200;

/// Classify a freshly materialized trace from its base summary and source
/// episodes.
pub fn classify_trace(summary: &str, _episodes: &[Episode]) -> TraceType {
    let lower = summary.to_lowercase();
    if KNOWLEDGE_MARKERS.iter().any(|m| lower.contains(m)) {
        return TraceType::Knowledge;
    }
    if OPERATIONAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return TraceType::Operational;
    }
    TraceType::Knowledge
}

/// Whether a cluster should be skipped as low-value: a short countdown-style
/// summary, or every source episode tagged as backchannel/greeting.
pub fn is_ephemeral(summary: &str, episodes: &[Episode]) -> bool {
    if summary.len() < EPHEMERAL_MAX_LEN && COUNTDOWN_RE.is_match(summary) {
        return true;
    }
    !episodes.is_empty()
        && episodes.iter().all(|e| {
            e.dialogue_act
                .as_deref()
                .map(|act| LOW_VALUE_ACTS.contains(&act.to_lowercase().as_str()))
                .unwrap_or(false)
        })
}
