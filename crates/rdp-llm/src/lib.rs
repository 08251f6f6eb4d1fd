//! OpenRouter-compatible chat-completions client + retry/fallback handling for profile generation.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

mod retry;

pub use retry::{AttemptContext, BackoffPolicy, RetryConfig, RetryHandler, RetryStats};

pub const CRATE_NAME: &str = "rdp-llm";

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Instruction appended to the user message after the model returned unparseable JSON.
pub const PURE_JSON_REMINDER: &str =
    "IMPORTANT: Respond with a single valid JSON object only. No markdown, no code fences, no commentary.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
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
}

/// Request body sent to `/chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip)]
    pub timeout: Duration,
}

impl ChatRequest {
    /// Append the pure-JSON reminder to the last user message.
    pub fn with_pure_json_reminder(mut self) -> Self {
        match self.messages.iter_mut().rev().find(|m| m.role == "user") {
            Some(message) => {
                message.content.push_str("\n\n");
                message.content.push_str(PURE_JSON_REMINDER);
            }
            None => self.messages.push(ChatMessage::user(PURE_JSON_REMINDER)),
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Parsed completion: the JSON object the model produced plus envelope metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub content: JsonValue,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub elapsed: Duration,
}

/// Which retry strategy a failure calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    JsonParse,
    Timeout,
    Other,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("model returned invalid JSON: {0}")]
    InvalidJson(String),
    #[error("http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("response contained no message content")]
    MissingContent,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no model available to attempt")]
    Exhausted,
}

impl LlmError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LlmError::InvalidJson(_) | LlmError::MissingContent => FailureKind::JsonParse,
            LlmError::Timeout(_) => FailureKind::Timeout,
            LlmError::Request(err) if err.is_timeout() => FailureKind::Timeout,
            _ => FailureKind::Other,
        }
    }

    /// False for client errors that will fail identically on every attempt with the same model.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(true),
            LlmError::Exhausted => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Seam between the pipeline and the model provider.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatOutcome, LlmError>;
}

#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub referer: Option<String>,
    pub app_title: Option<String>,
    pub user_agent: Option<String>,
}

impl OpenRouterConfig {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            referer: None,
            app_title: Some("rescue-dog-profiler".to_string()),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    referer: Option<String>,
    app_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionEnvelope {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    message: String,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            referer: config.referer,
            app_title: config.app_title,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatCompletion for OpenRouterClient {
    fn provider(&self) -> &'static str {
        "openrouter"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatOutcome, LlmError> {
        let span = info_span!("llm_request", model = %request.model, timeout_ms = request.timeout.as_millis() as u64);
        async {
            let started = Instant::now();
            let mut builder = self
                .client
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose_secret())
                .timeout(request.timeout)
                .json(request);
            if let Some(referer) = &self.referer {
                builder = builder.header("HTTP-Referer", referer);
            }
            if let Some(title) = &self.app_title {
                builder = builder.header("X-Title", title);
            }

            let resp = builder.send().await.map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout(request.timeout)
                } else {
                    LlmError::Request(err)
                }
            })?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(LlmError::HttpStatus {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                });
            }

            let body = resp.text().await.map_err(|err| {
                if err.is_timeout() {
                    LlmError::Timeout(request.timeout)
                } else {
                    LlmError::Request(err)
                }
            })?;
            let envelope: CompletionEnvelope = serde_json::from_str(&body).map_err(|err| {
                LlmError::InvalidJson(format!("completion envelope: {err}"))
            })?;
            if let Some(error) = envelope.error {
                return Err(LlmError::Provider(error.message));
            }
            let content = envelope
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|c| !c.trim().is_empty())
                .ok_or(LlmError::MissingContent)?;

            let parsed = extract_json_content(&content)?;
            debug!(chars = content.len(), "parsed completion content");

            Ok(ChatOutcome {
                content: parsed,
                model: envelope.model.unwrap_or_else(|| request.model.clone()),
                usage: envelope.usage,
                elapsed: started.elapsed(),
            })
        }
        .instrument(span)
        .await
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(500).collect()
}

/// Pull a JSON object out of model output that may be wrapped in markdown fences or prose.
pub fn extract_json_content(content: &str) -> Result<JsonValue, LlmError> {
    let trimmed = strip_code_fences(content.trim());

    if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str::<JsonValue>(trimmed) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(LlmError::InvalidJson("no JSON object found in content".to_string()));
    };
    if end <= start {
        return Err(LlmError::InvalidJson("unbalanced JSON object in content".to_string()));
    }
    match serde_json::from_str::<JsonValue>(&trimmed[start..=end]) {
        Ok(value @ JsonValue::Object(_)) => Ok(value),
        Ok(_) => Err(LlmError::InvalidJson("content is not a JSON object".to_string())),
        Err(err) => Err(LlmError::InvalidJson(err.to_string())),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_and_chatty_content() {
        let fenced = "```json\n{\"energy_level\": \"high\"}\n```";
        assert_eq!(extract_json_content(fenced).unwrap()["energy_level"], "high");

        let chatty = "Sure! Here is the profile:\n{\"tagline\": \"Loves naps\"}\nHope this helps.";
        assert_eq!(extract_json_content(chatty).unwrap()["tagline"], "Loves naps");
    }

    #[test]
    fn rejects_content_without_an_object() {
        assert!(matches!(
            extract_json_content("I cannot help with that."),
            Err(LlmError::InvalidJson(_))
        ));
        assert!(matches!(
            extract_json_content("[1, 2, 3]"),
            Err(LlmError::InvalidJson(_))
        ));
    }

    #[test]
    fn failure_kinds_drive_retry_strategy() {
        assert_eq!(LlmError::InvalidJson("x".into()).kind(), FailureKind::JsonParse);
        assert_eq!(LlmError::Timeout(Duration::from_secs(1)).kind(), FailureKind::Timeout);
        assert_eq!(LlmError::Provider("overloaded".into()).kind(), FailureKind::Other);

        let unauthorized = LlmError::HttpStatus { status: 401, body: String::new() };
        let unavailable = LlmError::HttpStatus { status: 503, body: String::new() };
        let limited = LlmError::HttpStatus { status: 429, body: String::new() };
        assert!(!unauthorized.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(limited.is_retryable());
    }

    #[test]
    fn pure_json_reminder_lands_on_last_user_message() {
        let request = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("profile Max")],
            temperature: 0.7,
            max_tokens: 100,
            timeout: Duration::from_secs(5),
        }
        .with_pure_json_reminder();
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].content.starts_with("profile Max"));
        assert!(request.messages[1].content.ends_with(PURE_JSON_REMINDER));
        assert_eq!(request.messages[0].content, "sys");
    }
}
