//! HTTP gateway client
//!
//! Thin JSON client for a host-provided gateway process. Used by the
//! standalone compression worker, which has no in-process model. The
//! endpoint contract is `POST /embed {text}`, `POST /generate {prompt}`
//! and `POST /summarize {fragments}`; generation-model switching is sent
//! along with each generate request rather than as a separate call.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use super::{LanguageModel, LlmError};

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    text: String,
}

/// JSON-over-HTTP gateway client.
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    dimensions: usize,
    generation_model: Mutex<Option<String>>,
}

impl HttpGateway {
    /// Create a client for a gateway at `base_url` producing
    /// `dimensions`-sized embeddings.
    pub fn new(base_url: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dimensions,
            generation_model: Mutex::new(None),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, LlmError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Call(format!("{url}: {e}")))?;
        let response = response
            .error_for_status()
            .map_err(|e| LlmError::Call(format!("{url}: {e}")))?;
        response
            .json::<T>()
            .await
            .map_err(|e| LlmError::Call(format!("{url}: malformed response: {e}")))
    }
}

#[async_trait]
impl LanguageModel for HttpGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = serde_json::json!({ "text": text });
        let response: EmbedResponse = self.post_json("embed", body).await?;
        if response.embedding.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(response.embedding)
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let model = self
            .generation_model
            .lock()
            .map(|g| g.clone())
            .unwrap_or(None);
        let body = serde_json::json!({ "prompt": prompt, "model": model });
        let response: TextResponse = self.post_json("generate", body).await?;
        if response.text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(response.text)
    }

    async fn summarize(&self, fragments: &[String]) -> Result<String, LlmError> {
        let body = serde_json::json!({ "fragments": fragments });
        let response: TextResponse = self.post_json("summarize", body).await?;
        if response.text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(response.text)
    }

    fn set_generation_model(&self, name: &str) -> bool {
        match self.generation_model.lock() {
            Ok(mut guard) => {
                *guard = Some(name.to_string());
                true
            }
            Err(_) => false,
        }
    }

    fn embedding_dimension(&self) -> usize {
        self.dimensions
    }
}
