//! LLM client abstraction used by the model dispatcher.
//!
//! The dispatcher depends on a callable that takes chat messages and returns
//! text plus usage; this module defines the trait, the provider error shape
//! the retry policy keys off, and a mock for tests. The OpenAI-compatible
//! HTTP implementation lives in [`openai`].

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::OpenAiCompatClient;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One chat message (System / User / Assistant).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(content.into())
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System(c) | Message::User(c) | Message::Assistant(c) => c,
        }
    }
}

/// Token usage and cost for one call. Cached replays report all-zero usage.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub native_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

/// Completed call: assistant text plus usage.
#[derive(Clone, Debug)]
pub struct LlmCompletion {
    pub content: String,
    pub usage: LlmUsage,
}

/// Per-call options. `schema` requests strict JSON output where the provider
/// supports it; `json_only` requests a JSON object without a schema.
#[derive(Clone, Debug, Default)]
pub struct CompletionOptions {
    pub schema: Option<Value>,
    pub json_only: bool,
    pub timeout: Option<Duration>,
}

impl CompletionOptions {
    pub fn with_schema(schema: Value) -> Self {
        Self {
            schema: Some(schema),
            ..Default::default()
        }
    }

    pub fn json() -> Self {
        Self {
            json_only: true,
            ..Default::default()
        }
    }
}

/// Provider-level error. The dispatcher retries transient variants with
/// backoff and maps the rest to configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("model or endpoint not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    /// Transient errors are retried; the rest fail immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::Server(_)
                | LlmError::Network(_)
                | LlmError::Timeout(_)
        )
    }
}

/// LLM client: given messages and options, returns assistant text and usage.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider label for accounting ("openai-compat", "mock").
    fn provider(&self) -> &str;

    /// Concrete model name this client calls.
    fn model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmCompletion, LlmError>;
}
