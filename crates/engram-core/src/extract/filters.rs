//! Candidate post-processing
//!
//! Applied to both LLM-extracted and regex-rescued candidates before
//! resolution. The noise list is deliberately aggressive: a dropped real
//! entity returns on its next mention, a kept pronoun pollutes the graph
//! forever.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::EntityKind;

use super::ExtractedEntity;

/// Names that are never entities regardless of what the model says.
const NOISE_NAMES: &[&str] = &[
    // pronouns
    "i", "me", "my", "mine", "you", "your", "yours", "he", "him", "his", "she", "her", "hers",
    "it", "its", "we", "us", "our", "ours", "they", "them", "their", "theirs", "someone",
    "everyone", "anybody", "nobody",
    // backchannels and chat filler
    "yeah", "yep", "nope", "ok", "okay", "lol", "haha", "hmm", "huh", "thanks", "thank you",
    "hey", "hi", "hello", "bye", "sure", "cool", "nice", "right",
    // common tech nouns that read like products but aren't
    "api", "server", "database", "db", "code", "bug", "app", "laptop", "computer", "phone",
    "internet", "email", "link", "file", "repo", "branch", "meeting", "call", "chat", "message",
];

/// Vocabulary marking a multi-word PRODUCT candidate as a generic
/// description rather than a product name.
const GENERIC_PRODUCT_TERMS: &[&str] = &[
    "system", "project", "platform", "service", "tool", "feature", "pipeline", "framework",
    "dashboard", "process", "update", "version", "solution",
];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("static regex")
});

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£]\s?\d[\d,]*(?:\.\d{1,2})?|\b\d[\d,]*(?:\.\d{1,2})?\s?(?:USD|EUR|GBP|dollars|euros)\b")
        .expect("static regex")
});

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+\.[A-Za-z0-9]{1,5}$").expect("static regex"));

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[-_][a-z0-9]+)+$").expect("static regex"));

/// Whether a candidate name is an email address.
pub fn is_email(name: &str) -> bool {
    EMAIL_RE.is_match(name) && !name.contains(char::is_whitespace)
}

fn is_calendar_email(name: &str) -> bool {
    name.to_lowercase().ends_with("@group.calendar.google.com")
}

fn is_generic_product(candidate: &ExtractedEntity) -> bool {
    if candidate.kind != EntityKind::Product {
        return false;
    }
    let lower = candidate.name.to_lowercase();
    lower.contains(' ')
        && GENERIC_PRODUCT_TERMS
            .iter()
            .any(|term| lower.split_whitespace().any(|w| w == *term))
}

/// Run the full post-processing pass: noise and junk filtering, email/money
/// rescue from the raw content, type correction, case-insensitive dedup.
pub fn post_process(candidates: Vec<ExtractedEntity>, content: &str) -> Vec<ExtractedEntity> {
    let mut kept: Vec<ExtractedEntity> = Vec::with_capacity(candidates.len());

    for mut candidate in candidates {
        candidate.name = candidate.name.trim().to_string();
        let lower = candidate.name.to_lowercase();

        if NOISE_NAMES.contains(&lower.as_str()) {
            continue;
        }
        if candidate.name.chars().count() <= 2 {
            continue;
        }
        if is_calendar_email(&candidate.name) {
            continue;
        }

        // Type correction runs before the junk filters so real emails are
        // not mistaken for filenames
        if is_email(&candidate.name) {
            candidate.kind = EntityKind::Email;
        }

        if candidate.kind != EntityKind::Email && candidate.kind != EntityKind::Money {
            if FILENAME_RE.is_match(&candidate.name) {
                continue;
            }
            if SLUG_RE.is_match(&candidate.name) {
                continue;
            }
        }
        if is_generic_product(&candidate) {
            continue;
        }

        kept.push(candidate);
    }

    // Rescue: any email or money string in the content not already present
    for m in EMAIL_RE.find_iter(content) {
        let name = m.as_str().to_string();
        if is_calendar_email(&name) {
            continue;
        }
        if !kept.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            kept.push(ExtractedEntity {
                name,
                kind: EntityKind::Email,
                confidence: 0.9,
            });
        }
    }
    for m in MONEY_RE.find_iter(content) {
        let name = m.as_str().trim().to_string();
        if !kept.iter().any(|c| c.name.eq_ignore_ascii_case(&name)) {
            kept.push(ExtractedEntity {
                name,
                kind: EntityKind::Money,
                confidence: 0.9,
            });
        }
    }

    // Case-insensitive dedup, keeping the higher-confidence candidate
    let mut deduped: Vec<ExtractedEntity> = Vec::with_capacity(kept.len());
    for candidate in kept {
        match deduped
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&candidate.name))
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    *existing = candidate;
                }
            }
            None => deduped.push(candidate),
        }
    }
    deduped
}
