//! LLM gateway interface
//!
//! The core consumes generation, embedding and summarization through one
//! trait and makes no assumption about which model sits behind it - only
//! that the embedding dimension stays constant for the lifetime of a
//! database. Model switching is an optional capability probed at runtime
//! (the language-drift fallback uses it when present).

pub mod json;
mod mock;

#[cfg(feature = "http-gateway")]
mod http;

pub use mock::MockModel;

#[cfg(feature = "http-gateway")]
pub use http::HttpGateway;

use async_trait::async_trait;

/// Gateway failure. Treated as recoverable by callers: the pyramid stores
/// what it has, extraction returns partial results, consolidation falls back
/// to truncation.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The model call failed (transport, rate limit, server error)
    #[error("model call failed: {0}")]
    Call(String),
    /// The model returned empty output
    #[error("model returned empty output")]
    Empty,
}

/// The capability surface the core needs from a language model gateway.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Embed text into the gateway's fixed-dimension vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Single-shot text generation.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Summarize a list of fragments. The default funnels through
    /// [`generate`](LanguageModel::generate) for gateways without a
    /// dedicated summarization endpoint.
    async fn summarize(&self, fragments: &[String]) -> Result<String, LlmError> {
        let prompt = format!(
            "Summarize the following conversation fragments into one short paragraph. \
             Keep concrete facts, names and decisions. Output only the summary.\n\n{}",
            fragments.join("\n")
        );
        self.generate(&prompt).await
    }

    /// Switch the generation model, returning whether the gateway supports
    /// switching. Gateways without the capability return `false` and the
    /// caller proceeds with whatever it got.
    fn set_generation_model(&self, _name: &str) -> bool {
        false
    }

    /// Dimension of vectors produced by [`embed`](LanguageModel::embed).
    fn embedding_dimension(&self) -> usize;
}
