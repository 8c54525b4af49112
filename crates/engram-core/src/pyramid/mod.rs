//! Compression pyramid
//!
//! Every episode and trace carries five summaries at word budgets
//! 4, 8, 16, 32 and 64. Episodes are compressed independently per level so
//! each level sees the full original; trace levels cascade (64 from the
//! source episodes, then each level from the one above) so the whole tower
//! expresses the same propositional content. Summaries are never
//! decompressed - higher levels simply carry more detail.

use std::sync::Arc;

use crate::error::Result;
use crate::llm::{LanguageModel, LlmError};
use crate::model::{Episode, Summary};
use crate::store::Store;

/// Pyramid word budgets, ascending.
pub const LEVELS: [u8; 5] = [4, 8, 16, 32, 64];

/// Token estimate used for stored summaries: `max(1, bytes/4)`.
pub fn estimate_tokens(text: &str) -> i64 {
    std::cmp::max(1, (text.len() / 4) as i64)
}

/// Whitespace word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Strip a leading `AuthorName: ` pattern. The prefix must fall within the
/// first 50 characters and contain no internal whitespace.
pub fn strip_author_prefix(content: &str) -> &str {
    let window_end = content
        .char_indices()
        .take(50)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let window = &content[..window_end];
    if let Some(idx) = window.find(": ") {
        let prefix = &content[..idx];
        if !prefix.is_empty() && !prefix.chars().any(char::is_whitespace) {
            return &content[idx + 2..];
        }
    }
    content
}

/// Whether the text contains code points in the CJK Unified Ideographs
/// block (U+4E00..U+9FFF).
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

fn count_cjk(text: &str) -> usize {
    text.chars()
        .filter(|c| ('\u{4E00}'..='\u{9FFF}').contains(c))
        .count()
}

/// Hard-trim to the word budget. Model output is normally within budget;
/// the trim keeps the stored invariant unconditional.
fn clamp_to_budget(text: &str, budget: u8) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= budget as usize {
        words.join(" ")
    } else {
        words[..budget as usize].join(" ")
    }
}

/// Model-name configuration for the language-drift fallback.
#[derive(Debug, Clone, Default)]
pub struct CompressorOptions {
    /// Name of the everyday generation model (restored after a fallback)
    pub primary_model: Option<String>,
    /// English-focused model used when output drifts into CJK
    pub english_fallback_model: Option<String>,
}

/// Generates and stores pyramid summaries.
pub struct Compressor {
    model: Arc<dyn LanguageModel>,
    options: CompressorOptions,
}

impl Compressor {
    /// Create a compressor over a gateway.
    pub fn new(model: Arc<dyn LanguageModel>, options: CompressorOptions) -> Self {
        Self { model, options }
    }

    /// Compress `text` to at most `level` words. Sources already within
    /// budget are stored verbatim without a model call.
    pub async fn compress_text(&self, text: &str, level: u8) -> std::result::Result<String, LlmError> {
        let text = text.trim();
        if word_count(text) <= level as usize {
            return Ok(text.to_string());
        }
        let prompt = format!(
            "Compress this message to {} words or less.\n\n\
             Rules:\n\
             - Keep concrete facts, names, numbers and decisions\n\
             - No filler, no preamble\n\
             - Output English only\n\
             - Output only the compressed text\n\n\
             Message:\n{}",
            level, text
        );
        let output = self.generate_guarded(&prompt, text).await?;
        Ok(clamp_to_budget(&output, level))
    }

    /// Cascade step: compress an already-compressed summary one level down.
    async fn compress_summary(
        &self,
        text: &str,
        level: u8,
    ) -> std::result::Result<String, LlmError> {
        let text = text.trim();
        if word_count(text) <= level as usize {
            return Ok(text.to_string());
        }
        let prompt = format!(
            "Compress this summary to {} words or less.\n\n\
             Rules:\n\
             - Keep concrete facts, names, numbers and decisions\n\
             - No filler, no preamble\n\
             - Output English only\n\
             - Output only the compressed text\n\n\
             Summary:\n{}",
            level, text
        );
        let output = self.generate_guarded(&prompt, text).await?;
        Ok(clamp_to_budget(&output, level))
    }

    /// Base of the trace cascade: 64 words from the joined source fragments.
    async fn compress_fragments(
        &self,
        fragments: &[String],
    ) -> std::result::Result<String, LlmError> {
        let joined = fragments.join("\n");
        if word_count(&joined) <= 64 {
            return Ok(joined.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        let prompt = format!(
            "Compress this conversation to 64 words or less.\n\n\
             Rules:\n\
             - Keep concrete facts, names, numbers and decisions\n\
             - No filler, no preamble\n\
             - Output English only\n\
             - Output only the compressed text\n\n\
             Fragments:\n{}",
            joined
        );
        let output = self.generate_guarded(&prompt, &joined).await?;
        Ok(clamp_to_budget(&output, 64))
    }

    /// Generate, watching for language drift. When the output contains CJK
    /// that the input did not, retry once on the English-focused model; the
    /// generator is restored afterward regardless of outcome.
    async fn generate_guarded(
        &self,
        prompt: &str,
        input: &str,
    ) -> std::result::Result<String, LlmError> {
        let first = self.model.generate(prompt).await?;
        if !contains_cjk(&first) || contains_cjk(input) {
            return Ok(first);
        }

        let Some(fallback) = &self.options.english_fallback_model else {
            tracing::warn!("CJK drift in summary output and no fallback model configured");
            return Ok(first);
        };
        if !self.model.set_generation_model(fallback) {
            tracing::warn!("CJK drift in summary output; gateway cannot switch models");
            return Ok(first);
        }

        let retry = self.model.generate(prompt).await;

        if let Some(primary) = &self.options.primary_model {
            self.model.set_generation_model(primary);
        } else {
            tracing::debug!("No primary model configured; generator left on fallback");
        }

        match retry {
            Ok(second) if !contains_cjk(&second) => Ok(second),
            Ok(second) => {
                tracing::warn!("Fallback model also produced CJK; keeping the cleaner output");
                if count_cjk(&second) < count_cjk(&first) {
                    Ok(second)
                } else {
                    Ok(first)
                }
            }
            Err(e) => {
                tracing::warn!("Fallback generation failed: {}; keeping first output", e);
                Ok(first)
            }
        }
    }

    /// Generate the given pyramid levels for an episode, each level
    /// independently from the (author-stripped) source text. A level that
    /// fails generation is logged and skipped - the next run fills it in.
    /// Returns the number of levels written.
    pub async fn episode_pyramid(
        &self,
        store: &Store,
        episode: &Episode,
        levels: &[u8],
    ) -> Result<usize> {
        let source = strip_author_prefix(&episode.content);
        let mut written = 0;
        for level in levels {
            match self.compress_text(source, *level).await {
                Ok(text) => {
                    store.put_episode_summary(&Summary {
                        owner_id: episode.id.clone(),
                        level: *level,
                        est_tokens: estimate_tokens(&text),
                        text,
                    })?;
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Summary generation failed for {} L{}: {}",
                        episode.id,
                        level,
                        e
                    );
                }
            }
        }
        Ok(written)
    }

    /// Generate the full cascaded pyramid for a trace from its source
    /// fragments: 64 from the fragments, then each level from the level
    /// above. A failed cascade step stops the tower there; coarser levels
    /// stay regenerable from the sources.
    pub async fn trace_pyramid(
        &self,
        store: &Store,
        trace_id: &str,
        fragments: &[String],
    ) -> Result<usize> {
        let mut current = match self.compress_fragments(fragments).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Trace pyramid base failed for {}: {}", trace_id, e);
                return Ok(0);
            }
        };
        store.put_trace_summary(&Summary {
            owner_id: trace_id.to_string(),
            level: 64,
            est_tokens: estimate_tokens(&current),
            text: current.clone(),
        })?;
        let mut written = 1;

        for level in LEVELS.iter().rev().skip(1) {
            match self.compress_summary(&current, *level).await {
                Ok(text) => {
                    store.put_trace_summary(&Summary {
                        owner_id: trace_id.to_string(),
                        level: *level,
                        est_tokens: estimate_tokens(&text),
                        text: text.clone(),
                    })?;
                    current = text;
                    written += 1;
                }
                Err(e) => {
                    tracing::warn!("Trace pyramid L{} failed for {}: {}", level, trace_id, e);
                    break;
                }
            }
        }
        Ok(written)
    }
}
