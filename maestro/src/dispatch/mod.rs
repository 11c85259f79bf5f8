//! Model dispatcher: tier routing, global rate limiting, retries, and
//! schema-constrained JSON with repair.
//!
//! Callers pick a [`ModelTier`]; the dispatcher resolves it to a concrete
//! client, acquires the process-wide LLM semaphore, and runs the call with
//! exponential backoff on transient provider errors. Structured calls request
//! strict JSON first, then fall back to an unconstrained retry with schema
//! guidance appended, running every response through the repair pipeline.
//!
//! The dispatcher returns usage; it does not touch mission stats itself. The
//! caller logs the call with `model_details` and the context store folds
//! stats exactly once per appended entry.

pub mod json_repair;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::governor;
use crate::llm::{
    CompletionOptions, LlmClient, LlmCompletion, LlmError, LlmUsage, Message, OpenAiCompatClient,
};
use crate::schemas::ModelCallDetails;

pub use env_config::ModelTier;

/// Max attempts for one logical call (first try + retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base backoff before the first retry; doubles per attempt, plus jitter.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Routes completions to per-tier clients under the global LLM semaphore.
pub struct ModelDispatcher {
    clients: HashMap<ModelTier, Arc<dyn LlmClient>>,
    semaphore: Arc<Semaphore>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl ModelDispatcher {
    /// Builds clients from the configured tier bindings. Tiers missing an API
    /// key get no client and fail with a configuration error at first use.
    pub fn from_bindings(bindings: &env_config::TierBindings) -> Self {
        let mut clients: HashMap<ModelTier, Arc<dyn LlmClient>> = HashMap::new();
        for tier in ModelTier::ALL {
            let b = bindings.get(tier);
            if let Some(key) = &b.api_key {
                clients.insert(
                    tier,
                    Arc::new(OpenAiCompatClient::new(&b.model, &b.base_url, key)),
                );
            }
        }
        Self {
            clients,
            semaphore: governor::global_llm_semaphore(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: BASE_BACKOFF,
        }
    }

    /// Dispatcher with explicit clients (tests, custom providers).
    pub fn with_clients(clients: HashMap<ModelTier, Arc<dyn LlmClient>>) -> Self {
        Self {
            clients,
            semaphore: governor::global_llm_semaphore(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(1),
        }
    }

    /// Installs one client for every tier (tests with a single mock).
    pub fn with_client_for_all(client: Arc<dyn LlmClient>) -> Self {
        let clients = ModelTier::ALL
            .iter()
            .map(|t| (*t, client.clone()))
            .collect();
        Self::with_clients(clients)
    }

    fn client(&self, tier: ModelTier) -> Result<&Arc<dyn LlmClient>, DispatchError> {
        self.clients.get(&tier).ok_or_else(|| {
            DispatchError::Configuration(format!(
                "no API key configured for the '{}' model tier",
                tier.as_str()
            ))
        })
    }

    /// Plain text completion under the global semaphore.
    pub async fn complete(
        &self,
        tier: ModelTier,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(String, ModelCallDetails), DispatchError> {
        let completion = self
            .call_with_retry(tier, messages, &CompletionOptions::default(), cancel)
            .await?;
        let details = self.details_for(tier, &completion.usage)?;
        Ok((completion.content, details))
    }

    /// Schema-constrained completion: strict JSON first, unconstrained
    /// fallback with schema guidance, repair pipeline on both.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        tier: ModelTier,
        messages: &[Message],
        schema: Value,
        cancel: &CancellationToken,
    ) -> Result<(T, ModelCallDetails), DispatchError> {
        let options = CompletionOptions::with_schema(schema.clone());
        let completion = self.call_with_retry(tier, messages, &options, cancel).await?;
        let details = self.details_for(tier, &completion.usage)?;

        match parse_structured::<T>(&completion.content) {
            Ok(parsed) => return Ok((parsed, details)),
            Err(first_err) => {
                tracing::debug!(error = %first_err, "strict JSON parse failed; retrying unconstrained");
            }
        }

        // Fallback: plain JSON mode with the schema spelled out in the prompt.
        let mut guided = messages.to_vec();
        guided.push(Message::user(format!(
            "Respond with a single JSON object matching this JSON schema exactly. \
             No prose, no code fences.\n{}",
            schema
        )));
        let retry = self
            .call_with_retry(tier, &guided, &CompletionOptions::json(), cancel)
            .await?;
        // Both calls bill to the one logical step.
        let mut retry_details = self.details_for(tier, &retry.usage)?;
        retry_details.prompt_tokens += details.prompt_tokens;
        retry_details.completion_tokens += details.completion_tokens;
        retry_details.native_tokens += details.native_tokens;
        retry_details.cost += details.cost;

        let parsed = parse_structured::<T>(&retry.content)
            .map_err(DispatchError::Schema)?;
        Ok((parsed, retry_details))
    }

    fn details_for(
        &self,
        tier: ModelTier,
        usage: &LlmUsage,
    ) -> Result<ModelCallDetails, DispatchError> {
        let client = self.client(tier)?;
        Ok(ModelCallDetails {
            model_name: client.model().to_string(),
            provider: client.provider().to_string(),
            cost: usage.cost,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            native_tokens: usage.native_tokens,
        })
    }

    async fn call_with_retry(
        &self,
        tier: ModelTier,
        messages: &[Message],
        options: &CompletionOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmCompletion, DispatchError> {
        let client = self.client(tier)?.clone();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            // The permit is scoped to one attempt so a backoff sleep never
            // holds a global slot.
            let permit = tokio::select! {
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| DispatchError::Cancelled)?
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                r = client.complete(messages, options) => r,
            };
            drop(permit);

            match result {
                Ok(completion) => return Ok(completion),
                Err(e) if !e.is_transient() => {
                    return Err(match e {
                        LlmError::Auth(m) | LlmError::NotFound(m) | LlmError::InvalidRequest(m) => {
                            DispatchError::Configuration(m)
                        }
                        other => DispatchError::Configuration(other.to_string()),
                    });
                }
                Err(e) if attempt >= self.max_attempts => {
                    return Err(DispatchError::Transient {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    let backoff = self.backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient provider error; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff * 2u32.saturating_pow(attempt - 1);
        let jitter = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64 / 2);
        exp + Duration::from_millis(jitter)
    }
}

/// Parses model output into `T` via the repair pipeline. Exposed for tests.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let value = json_repair::repair_to_value(raw)?;
    serde_json::from_value::<T>(value.clone()).or_else(|first| {
        // A bare string where an object was expected: coerce titles.
        let coerced =
            json_repair::coerce_string_items(value, "title", &["description", "reasoning"]);
        serde_json::from_value::<T>(coerced).map_err(|_| first.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::schemas::QuestionSet;

    fn dispatcher_with(mock: MockLlm) -> ModelDispatcher {
        ModelDispatcher::with_client_for_all(Arc::new(mock))
    }

    #[tokio::test]
    async fn complete_returns_text_and_details() {
        let mock = MockLlm::new("hello");
        let d = dispatcher_with(mock);
        let (text, details) = d
            .complete(ModelTier::Fast, &[Message::user("hi")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "hello");
        assert_eq!(details.provider, "mock");
        assert!(details.prompt_tokens > 0);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let mock = MockLlm::new("recovered");
        mock.push_error(LlmError::Server("503".into()));
        mock.push_error(LlmError::RateLimited("429".into()));
        let d = dispatcher_with(mock);
        let (text, _) = d
            .complete(ModelTier::Mid, &[Message::user("x")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test]
    async fn auth_error_fails_immediately_as_configuration() {
        let mock = MockLlm::new("never");
        mock.push_error(LlmError::Auth("invalid api key".into()));
        let d = dispatcher_with(mock);
        let err = d
            .complete(ModelTier::Fast, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn retries_exhaust_to_transient_error() {
        let mock = MockLlm::new("never");
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            mock.push_error(LlmError::Server("boom".into()));
        }
        let d = dispatcher_with(mock);
        let err = d
            .complete(ModelTier::Fast, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::Transient { attempts, .. } => {
                assert_eq!(attempts, DEFAULT_MAX_ATTEMPTS)
            }
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_call() {
        let mock = MockLlm::new("text");
        let d = dispatcher_with(mock);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = d.complete(ModelTier::Fast, &[], &cancel).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }

    #[tokio::test]
    async fn unconfigured_tier_is_configuration_error() {
        let d = ModelDispatcher::with_clients(HashMap::new());
        let err = d
            .complete(ModelTier::Intelligent, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn structured_parses_strict_json() {
        let mock = MockLlm::new(r#"{"questions": ["q1", "q2"]}"#);
        let d = dispatcher_with(mock);
        let (qs, _): (QuestionSet, _) = d
            .complete_structured(
                ModelTier::Fast,
                &[Message::user("gen questions")],
                QuestionSet::schema(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(qs.questions.len(), 2);
    }

    #[tokio::test]
    async fn structured_falls_back_on_chatter() {
        let mock = MockLlm::new("ignored");
        mock.push("I will now answer in prose, definitely not JSON.");
        mock.push("Sure:\n```json\n{\"questions\": [\"only one\"]}\n```");
        let d = dispatcher_with(mock);
        let (qs, _): (QuestionSet, _) = d
            .complete_structured(
                ModelTier::Fast,
                &[Message::user("gen")],
                QuestionSet::schema(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(qs.questions, vec!["only one"]);
    }

    #[tokio::test]
    async fn structured_gives_schema_error_when_unrepairable() {
        let mock = MockLlm::new("not json at all");
        let d = dispatcher_with(mock);
        let err = d
            .complete_structured::<QuestionSet>(
                ModelTier::Fast,
                &[],
                QuestionSet::schema(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Schema(_)));
    }
}
