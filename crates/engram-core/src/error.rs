//! Engine error types
//!
//! Missing rows are not errors: single-row reads return `Ok(None)` and batch
//! reads skip unreadable rows. Advisory writes (activation, salience,
//! last-accessed) are logged and swallowed by their callers.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Language-model gateway failure
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),
    /// Model output could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Operation canceled via its cancellation token
    #[error("Operation canceled")]
    Canceled,
    /// Referenced row does not exist where one was required
    #[error("Not found: {0}")]
    NotFound(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Whether the error came from the LLM gateway (recoverable by design:
    /// callers store what they have or fall back).
    pub fn is_llm(&self) -> bool {
        matches!(self, EngineError::Llm(_))
    }
}
