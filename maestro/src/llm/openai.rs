//! OpenAI-compatible chat-completion client. One instance per provider
//! binding (model + endpoint + key); works against any endpoint speaking the
//! chat-completions wire format.

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;

use super::{CompletionOptions, LlmClient, LlmCompletion, LlmError, LlmUsage, Message};

/// Default wall-clock limit for one completion call.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatClient {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(model: impl Into<String>, base_url: &str, api_key: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: async_openai::Client::with_config(config),
            model: model.into(),
        }
    }

    fn to_request_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        messages
            .iter()
            .map(|m| {
                let msg: Result<ChatCompletionRequestMessage, OpenAIError> = match m {
                    Message::System(c) => ChatCompletionRequestSystemMessageArgs::default()
                        .content(c.as_str())
                        .build()
                        .map(Into::into),
                    Message::User(c) => ChatCompletionRequestUserMessageArgs::default()
                        .content(c.as_str())
                        .build()
                        .map(Into::into),
                    Message::Assistant(c) => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(c.as_str())
                        .build()
                        .map(Into::into),
                };
                msg.map_err(|e| LlmError::InvalidRequest(e.to_string()))
            })
            .collect()
    }

    fn map_error(err: OpenAIError) -> LlmError {
        match err {
            OpenAIError::ApiError(api) => {
                let message = api.message.clone();
                let lowered = message.to_lowercase();
                if lowered.contains("api key")
                    || lowered.contains("unauthorized")
                    || lowered.contains("authentication")
                {
                    LlmError::Auth(message)
                } else if lowered.contains("not found") || lowered.contains("does not exist") {
                    LlmError::NotFound(message)
                } else if lowered.contains("rate limit") || lowered.contains("overloaded") {
                    LlmError::RateLimited(message)
                } else {
                    LlmError::Server(message)
                }
            }
            OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
            other => LlmError::InvalidRequest(other.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<LlmCompletion, LlmError> {
        let request_messages = Self::to_request_messages(messages)?;
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(request_messages);

        if let Some(schema) = &options.schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    name: "structured_output".to_string(),
                    description: None,
                    schema: Some(schema.clone()),
                    strict: Some(true),
                },
            });
        } else if options.json_only {
            builder.response_format(ResponseFormat::JsonObject);
        }

        let request = builder
            .build()
            .map_err(|e| LlmError::InvalidRequest(e.to_string()))?;

        let limit = options.timeout.unwrap_or(DEFAULT_COMPLETION_TIMEOUT);
        let response = tokio::time::timeout(limit, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout(limit))?
            .map_err(Self::map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = response
            .usage
            .map(|u| LlmUsage {
                prompt_tokens: u64::from(u.prompt_tokens),
                completion_tokens: u64::from(u.completion_tokens),
                native_tokens: u64::from(u.total_tokens),
                cost: 0.0,
            })
            .unwrap_or_default();

        Ok(LlmCompletion { content, usage })
    }
}
