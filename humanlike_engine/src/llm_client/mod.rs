//! OpenAI-compatible chat completion client.
//!
//! The engine only ever talks to the model through [`ChatModel`], so tests
//! and alternative backends can stand in for the HTTP client.

pub mod sse;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use crate::http_client::build_http_client;

/// One item of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion. Status and connection failures are
    /// returned here; failures mid-body arrive as stream items.
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<DeltaStream>;

    /// Single-shot completion returning the whole reply.
    async fn complete(&self, messages: Vec<Message>) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Clone)]
pub struct OpenAiChatClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = build_http_client(Duration::from_secs(config.request_timeout_secs.max(1)))?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: &LlmConfig, client: reqwest::Client) -> Self {
        Self {
            api_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, messages: Vec<Message>, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            stream,
        };

        let mut req = self.client.post(&url).json(&request);

        // Add API key header if provided (not needed for local models)
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if stream {
            req = req.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            return Err(EngineError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<DeltaStream> {
        tracing::debug!(
            "Streaming completion from {} ({} messages)",
            self.model,
            messages.len()
        );
        let response = self.post(messages, true).await?;
        Ok(sse::decode_event_stream(response.bytes_stream()))
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String> {
        let response = self.post(messages, false).await?;
        let completion: ChatCompletionResponse = response.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(EngineError::EmptyResponse)
    }
}
