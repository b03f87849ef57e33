//! # LLM capability
//!
//! The single abstract capability the orchestrator depends on: send a
//! prompt with history to a provider, get text back, possibly streamed.
//!
//! Both supported providers speak the OpenAI-compatible chat-completions
//! protocol, so one `async-openai` client covers them; the [`Provider`]
//! value is carried through for configuration defaults, message tagging,
//! and error reporting. Every request runs under a finite timeout.
//!
//! Streaming pushes [`StreamEvent`]s through a `tokio` mpsc channel: chunks
//! arrive in order, a [`StreamEvent::Done`] marker signals completion, and
//! a [`StreamEvent::Error`] marker may arrive instead of it. If the
//! receiver goes away mid-stream the call is abandoned and reported as an
//! error, so nothing downstream persists a partial response.

use crate::context::HistoryMessage;
use crate::error::{ProviderFailure, StoryError};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
    Client,
};
use futures::StreamExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// The two interchangeable LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Ollama,
    DeepSeek,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::DeepSeek => "deepseek",
        }
    }

    /// Model requested when neither the store nor the request names one.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama2",
            Self::DeepSeek => "deepseek-chat",
        }
    }

    /// OpenAI-compatible endpoint base when none is stored.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    /// Request timeout when none is configured. The local provider gets a
    /// generous window since small machines generate slowly.
    pub fn default_timeout(self) -> Duration {
        match self {
            Self::Ollama => Duration::from_secs(300),
            Self::DeepSeek => Duration::from_secs(60),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = StoryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "ollama" => Ok(Self::Ollama),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(StoryError::validation_field(
                format!("unsupported provider: {other}"),
                "provider",
            )),
        }
    }
}

/// Fully resolved call parameters for one provider.
#[derive(Debug, Clone)]
pub struct ResolvedProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// One completion call: optional system prompt, prior history, and the
/// user-turn message.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub history: Vec<HistoryMessage>,
    pub user_message: String,
}

/// Result of a successful completion call.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub text: String,
    pub model: String,
}

/// Events pushed to a streaming consumer, in arrival order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

fn create_client(config: &ResolvedProviderConfig) -> Result<Client<OpenAIConfig>, StoryError> {
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.api_key.clone())
        .with_api_base(config.base_url.clone());

    let http_client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| StoryError::Internal(format!("http client build failed: {e}")))?;

    Ok(Client::with_config(openai_config).with_http_client(http_client))
}

#[allow(deprecated)]
fn to_request_message(role: &str, content: String) -> Result<ChatCompletionRequestMessage, StoryError> {
    match role {
        "system" => Ok(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(content),
                name: None,
            },
        )),
        "user" => Ok(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(content),
                name: None,
            },
        )),
        "assistant" => Ok(ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessage {
                content: Some(ChatCompletionRequestAssistantMessageContent::Text(content)),
                name: None,
                refusal: None,
                audio: None,
                tool_calls: None,
                function_call: None,
            },
        )),
        other => Err(StoryError::Internal(format!(
            "message with unsupported role '{other}'"
        ))),
    }
}

fn request_messages(
    request: &CompletionRequest,
) -> Result<Vec<ChatCompletionRequestMessage>, StoryError> {
    let mut messages = Vec::with_capacity(request.history.len() + 2);

    if let Some(system_prompt) = &request.system_prompt {
        messages.push(to_request_message("system", system_prompt.clone())?);
    }
    for msg in &request.history {
        messages.push(to_request_message(&msg.role, msg.content.clone())?);
    }
    messages.push(to_request_message("user", request.user_message.clone())?);

    Ok(messages)
}

fn provider_error(provider: Provider, err: OpenAIError) -> StoryError {
    let kind = match &err {
        OpenAIError::ApiError(_) => ProviderFailure::Api,
        _ => ProviderFailure::Network,
    };
    error!("provider {provider} call failed: {err}");
    StoryError::Provider {
        provider: provider.to_string(),
        kind,
        message: err.to_string(),
    }
}

/// Send a completion request and wait for the full response.
pub async fn complete(
    config: &ResolvedProviderConfig,
    request: &CompletionRequest,
) -> Result<CompletionOutcome, StoryError> {
    let client = create_client(config)?;
    let messages = request_messages(request)?;

    let chat_request = CreateChatCompletionRequestArgs::default()
        .max_tokens(config.max_tokens)
        .temperature(config.temperature)
        .model(config.model.clone())
        .messages(messages)
        .build()
        .map_err(|e| StoryError::Internal(format!("request build failed: {e}")))?;

    debug!("sending completion request to {}", config.provider);

    let response = client
        .chat()
        .create(chat_request)
        .await
        .map_err(|e| provider_error(config.provider, e))?;

    let mut text = String::new();
    for choice in response.choices {
        if let Some(content) = choice.message.content {
            text.push_str(&content);
        }
    }

    Ok(CompletionOutcome {
        text,
        model: response.model,
    })
}

/// Send a completion request and forward chunks through `events` as they
/// arrive. The accumulated full text is returned on success, after a
/// [`StreamEvent::Done`] has been pushed.
pub async fn complete_stream(
    config: &ResolvedProviderConfig,
    request: &CompletionRequest,
    events: mpsc::Sender<StreamEvent>,
) -> Result<CompletionOutcome, StoryError> {
    let client = create_client(config)?;
    let messages = request_messages(request)?;

    let chat_request = CreateChatCompletionRequestArgs::default()
        .max_tokens(config.max_tokens)
        .temperature(config.temperature)
        .model(config.model.clone())
        .messages(messages)
        .build()
        .map_err(|e| StoryError::Internal(format!("request build failed: {e}")))?;

    debug!("sending streaming completion request to {}", config.provider);

    let mut stream = client
        .chat()
        .create_stream(chat_request)
        .await
        .map_err(|e| provider_error(config.provider, e))?;

    let mut text = String::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(chunk) => {
                for choice in &chunk.choices {
                    if let Some(content) = &choice.delta.content {
                        text.push_str(content);
                        if events.send(StreamEvent::Chunk(content.clone())).await.is_err() {
                            return Err(StoryError::Internal(
                                "stream receiver dropped; response discarded".to_string(),
                            ));
                        }
                    }
                }
            }
            Err(err) => {
                let err = provider_error(config.provider, err);
                let _ = events.send(StreamEvent::Error(err.to_string())).await;
                return Err(err);
            }
        }
    }

    let _ = events.send(StreamEvent::Done).await;

    Ok(CompletionOutcome {
        text,
        model: config.model.clone(),
    })
}

/// List the models a provider currently serves.
pub async fn list_models(config: &ResolvedProviderConfig) -> Result<Vec<String>, StoryError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| StoryError::Internal(format!("http client build failed: {e}")))?;

    let url = format!("{}/models", config.base_url.trim_end_matches('/'));
    let response = http_client
        .get(&url)
        .bearer_auth(&config.api_key)
        .send()
        .await
        .map_err(|e| StoryError::Provider {
            provider: config.provider.to_string(),
            kind: ProviderFailure::Network,
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(StoryError::Provider {
            provider: config.provider.to_string(),
            kind: ProviderFailure::Api,
            message: format!("model listing returned {}", response.status()),
        });
    }

    let body: serde_json::Value = response.json().await.map_err(|e| StoryError::Provider {
        provider: config.provider.to_string(),
        kind: ProviderFailure::Network,
        message: e.to_string(),
    })?;

    let models = body["data"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Ok(models)
}

/// Is the provider reachable at all?
pub async fn health_check(config: &ResolvedProviderConfig) -> bool {
    list_models(config).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_config(base_url: String) -> ResolvedProviderConfig {
        ResolvedProviderConfig {
            provider: Provider::Ollama,
            model: "test-model".to_string(),
            api_key: String::new(),
            base_url,
            max_tokens: 256,
            temperature: 0.7,
            timeout: Duration::from_secs(5),
        }
    }

    fn simple_request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: Some("You are a writer.".to_string()),
            history: vec![HistoryMessage {
                role: "assistant".to_string(),
                content: "Once upon a time.".to_string(),
            }],
            user_message: "Continue.".to_string(),
        }
    }

    #[test]
    fn provider_names_round_trip() {
        assert_eq!(Provider::from_str("ollama").unwrap(), Provider::Ollama);
        assert_eq!(Provider::from_str("deepseek").unwrap(), Provider::DeepSeek);
        assert!(matches!(
            Provider::from_str("openrouter"),
            Err(StoryError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn complete_returns_the_assistant_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "id": "cmpl-1",
                "object": "chat.completion",
                "created": 1,
                "model": "test-model",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "And so it went."},
                    "finish_reason": "stop"
                }]
            }));
        });

        let config = test_config(server.base_url());
        let outcome = complete(&config, &simple_request()).await.unwrap();

        mock.assert();
        assert_eq!(outcome.text, "And so it went.");
        assert_eq!(outcome.model, "test-model");
    }

    #[tokio::test]
    async fn api_failures_surface_as_provider_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401).json_body(json!({
                "error": {
                    "message": "bad api key",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": null
                }
            }));
        });

        let config = test_config(server.base_url());
        let err = complete(&config, &simple_request()).await.unwrap_err();

        match err {
            StoryError::Provider { provider, kind, .. } => {
                assert_eq!(provider, "ollama");
                assert_eq!(kind, ProviderFailure::Api);
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_forwards_chunks_then_done() {
        let server = MockServer::start();
        let chunk = |content: &str| {
            json!({
                "id": "cmpl-1",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "test-model",
                "choices": [{
                    "index": 0,
                    "delta": {"content": content},
                    "finish_reason": null
                }]
            })
            .to_string()
        };
        let body = format!(
            "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
            chunk("It was "),
            chunk("midnight.")
        );
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(body);
        });

        let config = test_config(server.base_url());
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = complete_stream(&config, &simple_request(), tx).await.unwrap();
        assert_eq!(outcome.text, "It was midnight.");

        let mut chunks = Vec::new();
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Chunk(c) => chunks.push(c),
                StreamEvent::Done => {
                    saw_done = true;
                    break;
                }
                StreamEvent::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        assert_eq!(chunks, vec!["It was ", "midnight."]);
        assert!(saw_done);
    }

    #[tokio::test]
    async fn model_listing_parses_the_data_array() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/models");
            then.status(200).json_body(json!({
                "object": "list",
                "data": [{"id": "llama2"}, {"id": "mistral"}]
            }));
        });

        let config = test_config(server.base_url());
        let models = list_models(&config).await.unwrap();
        assert_eq!(models, vec!["llama2", "mistral"]);
        assert!(health_check(&config).await);
    }
}
