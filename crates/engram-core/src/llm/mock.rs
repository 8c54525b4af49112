//! Deterministic mock gateway for tests
//!
//! Behaves like a cooperative model without any network access: compression
//! prompts are answered by word-budget truncation of the payload, structured
//! prompts by empty JSON, and embeddings by a seeded hash of the input text.
//! Scripted responses and embeddings can be queued to drive specific paths.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;

use super::{LanguageModel, LlmError};

/// Deterministic in-process model for tests and offline runs.
pub struct MockModel {
    dimensions: usize,
    responses: Mutex<VecDeque<String>>,
    embeddings: Mutex<HashMap<String, Vec<f32>>>,
    generation_model: Mutex<String>,
    switch_log: Mutex<Vec<String>>,
    supports_switch: bool,
    fail_generation: AtomicBool,
    budget_re: Regex,
}

impl MockModel {
    /// Create a mock producing `dimensions`-sized embeddings.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            responses: Mutex::new(VecDeque::new()),
            embeddings: Mutex::new(HashMap::new()),
            generation_model: Mutex::new("mock-primary".to_string()),
            switch_log: Mutex::new(Vec::new()),
            supports_switch: true,
            fail_generation: AtomicBool::new(false),
            budget_re: Regex::new(r"to (\d+) words or less").expect("static regex"),
        }
    }

    /// Create a mock that reports no model-switching capability.
    pub fn without_model_switch(dimensions: usize) -> Self {
        Self {
            supports_switch: false,
            ..Self::new(dimensions)
        }
    }

    /// Queue a scripted generation response, consumed before any default.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(text.into());
    }

    /// Pin the embedding returned for an exact input text.
    pub fn set_embedding(&self, text: impl Into<String>, vector: Vec<f32>) {
        self.embeddings.lock().unwrap().insert(text.into(), vector);
    }

    /// Make the next `generate` call fail once.
    pub fn fail_next_generation(&self) {
        self.fail_generation.store(true, Ordering::SeqCst);
    }

    /// Currently selected generation model name.
    pub fn generation_model(&self) -> String {
        self.generation_model.lock().unwrap().clone()
    }

    /// History of model switches, for asserting fallback behavior.
    pub fn switch_log(&self) -> Vec<String> {
        self.switch_log.lock().unwrap().clone()
    }

    /// Seeded pseudo-embedding: stable across processes, unit length.
    fn hash_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut bytes = vec![0u8; self.dimensions * 4];
        reader.fill(&mut bytes);
        let mut vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| {
                let raw = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (raw as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();
        crate::vector::l2_normalize(&mut vector);
        vector
    }

    /// Word-budget truncation of the payload after the prompt preamble.
    fn compress_payload(&self, prompt: &str, budget: usize) -> String {
        let payload = prompt
            .rsplit_once("Message:\n")
            .or_else(|| prompt.rsplit_once("Summary:\n"))
            .or_else(|| prompt.rsplit_once("Fragments:\n"))
            .map(|(_, tail)| tail)
            .unwrap_or(prompt);
        payload
            .split_whitespace()
            .take(budget)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl LanguageModel for MockModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if let Some(pinned) = self.embeddings.lock().unwrap().get(text) {
            return Ok(pinned.clone());
        }
        Ok(self.hash_embedding(text))
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if self.fail_generation.swap(false, Ordering::SeqCst) {
            return Err(LlmError::Call("scripted failure".to_string()));
        }
        if let Some(scripted) = self.responses.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        if let Some(caps) = self.budget_re.captures(prompt) {
            let budget: usize = caps[1].parse().unwrap_or(64);
            return Ok(self.compress_payload(prompt, budget));
        }
        if prompt.contains("\"edges\"") {
            return Ok(r#"{"edges":[]}"#.to_string());
        }
        if prompt.contains("\"entities\"") {
            return Ok(r#"{"entities":[]}"#.to_string());
        }
        if prompt.contains("\"relationships\"") {
            return Ok(r#"{"relationships":[]}"#.to_string());
        }
        // Summarization and everything else: echo a bounded slice of the input
        let tail = prompt
            .split_once("\n\n")
            .map(|(_, t)| t)
            .unwrap_or(prompt);
        Ok(tail.split_whitespace().take(60).collect::<Vec<_>>().join(" "))
    }

    fn set_generation_model(&self, name: &str) -> bool {
        if !self.supports_switch {
            return false;
        }
        *self.generation_model.lock().unwrap() = name.to_string();
        self.switch_log.lock().unwrap().push(name.to_string());
        true
    }

    fn embedding_dimension(&self) -> usize {
        self.dimensions
    }
}
