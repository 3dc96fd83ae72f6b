//! Text service abstraction and its OpenAI-compatible HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::Prompt;
use crate::config::AiConfig;
use crate::error::{LessonError, ProviderErrorKind, Result};

/// One chat completion call.
pub type CompletionRequest = Prompt;

/// A failed text service call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TextServiceError {
    /// Classification used for retry decisions.
    pub kind: ProviderErrorKind,
    /// Detail from the service or transport.
    pub message: String,
    /// Server-requested delay before retrying.
    pub retry_after: Option<Duration>,
}

impl TextServiceError {
    /// Creates an error without a retry hint.
    #[must_use]
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Adds a server-provided retry delay.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Classifies an HTTP error status.
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_orchestrator::{ProviderErrorKind, TextServiceError};
    /// use reqwest::StatusCode;
    ///
    /// let err = TextServiceError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
    /// assert_eq!(err.kind, ProviderErrorKind::RateLimit);
    /// ```
    #[must_use]
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let kind = match status.as_u16() {
            401 | 403 => ProviderErrorKind::Authentication,
            429 => ProviderErrorKind::RateLimit,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::InvalidRequest,
        };
        Self::new(kind, format!("HTTP {}: {}", status.as_u16(), body.into()))
    }
}

impl From<TextServiceError> for LessonError {
    fn from(err: TextServiceError) -> Self {
        Self::provider(err.kind, err.message)
    }
}

impl From<reqwest::Error> for TextServiceError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else if err.is_decode() {
            ProviderErrorKind::MalformedResponse
        } else {
            ProviderErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}

/// A chat completion backend.
#[async_trait]
pub trait TextService: Send + Sync {
    /// Returns the completion text for a prompt.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, TextServiceError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `POST {base_url}/chat/completions` client.
#[derive(Debug, Clone)]
pub struct HttpTextService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTextService {
    /// Creates a client from configuration.
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                LessonError::provider(
                    ProviderErrorKind::Network,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl TextService for HttpTextService {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, TextServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatBody {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            let mut err = TextServiceError::from_status(status, text);
            if let Some(delay) = retry_after {
                err = err.with_retry_after(delay);
            }
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            TextServiceError::new(ProviderErrorKind::MalformedResponse, e.to_string())
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                TextServiceError::new(
                    ProviderErrorKind::MalformedResponse,
                    "response contained no completion text",
                )
            })
    }
}
