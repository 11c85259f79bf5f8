//! Scripted mock LLM for tests: pops queued responses in order, falls back to
//! a default, and can inject errors to exercise the retry path.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CompletionOptions, LlmClient, LlmCompletion, LlmError, LlmUsage, Message};

type Scripted = Result<String, LlmError>;

/// Mock LLM client. Each call pops the next scripted response; when the
/// script is exhausted the default response repeats.
pub struct MockLlm {
    script: Mutex<VecDeque<Scripted>>,
    default_response: String,
    usage_per_call: LlmUsage,
}

impl MockLlm {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_response: default_response.into(),
            usage_per_call: LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                native_tokens: 0,
                cost: 0.0001,
            },
        }
    }

    /// Queues one successful response.
    pub fn push(&self, response: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Ok(response.into()));
    }

    /// Queues one error (e.g. to test retries).
    pub fn push_error(&self, error: LlmError) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(Err(error));
    }

    pub fn with_usage(mut self, usage: LlmUsage) -> Self {
        self.usage_per_call = usage;
        self
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<LlmCompletion, LlmError> {
        let next = self.script.lock().expect("mock script lock").pop_front();
        match next {
            Some(Ok(content)) => Ok(LlmCompletion {
                content,
                usage: self.usage_per_call.clone(),
            }),
            Some(Err(e)) => Err(e),
            None => Ok(LlmCompletion {
                content: self.default_response.clone(),
                usage: self.usage_per_call.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_then_default() {
        let mock = MockLlm::new("default");
        mock.push("first");
        let r1 = mock.complete(&[Message::user("x")], &CompletionOptions::default()).await;
        let r2 = mock.complete(&[Message::user("x")], &CompletionOptions::default()).await;
        assert_eq!(r1.unwrap().content, "first");
        assert_eq!(r2.unwrap().content, "default");
    }

    #[tokio::test]
    async fn scripted_error_surfaces() {
        let mock = MockLlm::new("default");
        mock.push_error(LlmError::Server("boom".into()));
        let r = mock.complete(&[], &CompletionOptions::default()).await;
        assert!(matches!(r, Err(LlmError::Server(_))));
    }
}
