//! Anthropic messages client for the team judge.
//!
//! Every call runs against a wall-clock budget fixed at construction (the judge
//! timeout). Transient failures (429, 5xx, transport errors) are retried only when the
//! backoff still fits inside the remaining budget, and each attempt's HTTP timeout is
//! whatever is left of it.
//!
//! Model: claude-sonnet-4-5 (pinned so rankings stay comparable across deployments)

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub mod prompts;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
pub const MODEL: &str = "claude-sonnet-4-5";
/// A verdict is a handful of indices and one sentence.
const MAX_TOKENS: u32 = 512;
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("call budget of {0:?} exhausted")]
    BudgetExhausted(Duration),
}

impl LlmError {
    /// Worth another attempt if the budget allows.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_timeout(),
            LlmError::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Text of the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    budget: Duration,
}

impl LlmClient {
    pub fn new(api_key: String, budget: Duration) -> Result<Self, LlmError> {
        Ok(Self {
            http: Client::builder().timeout(budget).build()?,
            api_key,
            budget,
        })
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// One messages call, retried on transient failures while the budget allows.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: [UserMessage {
                role: "user",
                content: prompt,
            }],
        };
        let deadline = Instant::now() + self.budget;

        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LlmError::BudgetExhausted(self.budget));
            }

            let err = match self.send(&body, remaining).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(delay) = retry_delay(attempt, remaining) else {
                return Err(err);
            };
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "LLM call failed, retrying: {err}"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send(
        &self,
        body: &MessagesRequest<'_>,
        timeout: Duration,
    ) -> Result<LlmResponse, LlmError> {
        let response = self
            .http
            .post(MESSAGES_URL)
            .timeout(timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: LlmResponse = response.json().await?;
        debug!(
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "LLM call succeeded"
        );
        Ok(parsed)
    }

    /// Calls the model and parses its text as JSON. The prompt must ask for JSON.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system: &str,
    ) -> Result<T, LlmError> {
        let response = self.call(prompt, system).await?;
        let text = response.text().ok_or(LlmError::EmptyContent)?;
        Ok(serde_json::from_str(strip_json_fences(text))?)
    }
}

/// Backoff before attempt `attempt + 1`, or `None` when attempts are used up or the
/// wait would leave no time for the request itself.
fn retry_delay(attempt: u32, remaining: Duration) -> Option<Duration> {
    if attempt + 1 >= MAX_ATTEMPTS {
        return None;
    }
    let delay = BASE_BACKOFF * 2u32.pow(attempt);
    (delay < remaining).then_some(delay)
}

/// Strips ```json ... ``` or ``` ... ``` fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
    else {
        return text;
    };
    let inner = inner.trim_start();
    inner.strip_suffix("```").map(str::trim).unwrap_or(inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_picks_first_text_block() {
        let response: LlmResponse = serde_json::from_str(
            r#"{"content":[{"type":"tool_use"},{"type":"text","text":"{\"a\":1}"}]}"#,
        )
        .unwrap();
        assert_eq!(response.text(), Some("{\"a\":1}"));
        assert_eq!(response.usage.input_tokens, 0);
    }

    #[test]
    fn test_retry_delay_doubles_within_attempt_limit() {
        let plenty = Duration::from_secs(20);
        assert_eq!(retry_delay(0, plenty), Some(Duration::from_millis(250)));
        assert_eq!(retry_delay(1, plenty), Some(Duration::from_millis(500)));
        assert_eq!(retry_delay(2, plenty), None);
    }

    #[test]
    fn test_retry_delay_respects_remaining_budget() {
        assert_eq!(retry_delay(0, Duration::from_millis(250)), None);
        assert_eq!(retry_delay(1, Duration::from_millis(400)), None);
    }

    #[test]
    fn test_transient_errors() {
        let api = |status: u16| LlmError::Api {
            status,
            message: String::new(),
        };
        assert!(api(429).is_transient());
        assert!(api(529).is_transient());
        assert!(!api(400).is_transient());
        assert!(!api(401).is_transient());
        assert!(!LlmError::EmptyContent.is_transient());
        assert!(!LlmError::BudgetExhausted(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_client_keeps_judge_budget() {
        let client = LlmClient::new("sk-test".into(), Duration::from_millis(1500)).unwrap();
        assert_eq!(client.budget(), Duration::from_millis(1500));
    }

    #[test]
    fn test_request_body_shape() {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: "sys",
            messages: [UserMessage {
                role: "user",
                content: "rank these",
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "rank these");
        assert_eq!(json["max_tokens"], 512);
    }

    #[test]
    fn test_strip_json_fences() {
        let verdict = "{\"selected_candidate_indices\": [1, 0], \"reason\": \"x\"}";
        assert_eq!(strip_json_fences(&format!("```json\n{verdict}\n```")), verdict);
        assert_eq!(strip_json_fences(&format!("```\n{verdict}\n```")), verdict);
        assert_eq!(strip_json_fences(verdict), verdict);
    }
}
