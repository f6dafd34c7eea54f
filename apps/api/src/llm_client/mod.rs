//! LLM client: the single point of entry for all completion API calls.
//!
//! ARCHITECTURAL RULE: No other module may call the completion API directly.
//! Handlers reach it through `AppState::llm`, an `Arc<dyn CompletionClient>`.
//!
//! Speaks the OpenAI-compatible chat-completions protocol, single-shot or streamed.
//! There is no retry: a failed call surfaces as an `LlmError` immediately.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[cfg(test)]
pub mod mock;
pub mod prompts;
pub mod stream;

pub use stream::FragmentStream;

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Completion API did not answer within {secs}s")]
    Timeout { secs: u64 },

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// One completion call: a fixed system instruction plus the user prompt.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    /// Ask the API for its JSON-object output mode.
    pub json_mode: bool,
}

/// The completion backend. Implement this to swap providers (or mock them)
/// without touching handlers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Requests a complete response and returns its text.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError>;

    /// Requests a streamed response. Resolves once the API has accepted the
    /// request; fragments then arrive through the returned stream.
    async fn stream(&self, request: CompletionRequest<'_>) -> Result<FragmentStream, LlmError>;

    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatResponse {
    /// Text of the first choice, if any.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub message: String,
}

/// Chat-completions client built once at startup from `Config`.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    completions_url: String,
    model: String,
    temperature: f32,
    timeout: Duration,
    stream_idle_timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_key: config.openai_api_key.clone(),
            completions_url: format!("{}/chat/completions", config.openai_base_url),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.llm_timeout_secs),
            stream_idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        })
    }

    fn chat_request<'a>(&'a self, request: &CompletionRequest<'a>, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: request.system,
                },
                ChatMessage {
                    role: "user",
                    content: request.prompt,
                },
            ],
            temperature: self.temperature,
            stream,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    fn timeout_error(&self) -> LlmError {
        LlmError::Timeout {
            secs: self.timeout.as_secs(),
        }
    }

    fn classify(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            self.timeout_error()
        } else {
            LlmError::Http(e)
        }
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String, LlmError> {
        let body = self.chat_request(&request, false);

        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let response = ensure_success(response).await?;
        let chat: ChatResponse = response.json().await.map_err(|e| self.classify(e))?;

        if let Some(usage) = &chat.usage {
            debug!(
                "Completion succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        match chat.text() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(LlmError::EmptyContent),
        }
    }

    async fn stream(&self, request: CompletionRequest<'_>) -> Result<FragmentStream, LlmError> {
        let body = self.chat_request(&request, true);

        let send = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        // Bounds the time to first byte, including reading an error body.
        let opened = async {
            let response = send.await.map_err(|e| self.classify(e))?;
            ensure_success(response).await
        };
        let response = tokio::time::timeout(self.timeout, opened)
            .await
            .map_err(|_| self.timeout_error())??;
        debug!("Completion stream opened (model: {})", self.model);

        Ok(stream::fragments_from_sse(
            response.bytes_stream(),
            self.stream_idle_timeout,
        ))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Turns a non-2xx response into `LlmError::Api`, preferring the API's own message.
async fn ensure_success(response: Response) -> Result<Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}
