//! The [`Llm`] boundary and [`LlmDriver`], an OpenAI-compatible client.
//!
//! The driver talks to any server exposing `/v1/chat/completions`, such as
//! [Ollama](https://ollama.com) (`http://localhost:11434`).  The
//! [`CortexOutput`] JSON Schema is sent as `response_format` so the model
//! answers with a typed action list.  The same driver doubles as the history
//! [`Summarizer`].
//!
//! # Config keys
//!
//! | Key | Default |
//! |---|---|
//! | `base_url` | `http://localhost:11434` |
//! | `model` | `llama3.2` |
//! | `api_key` | none (sent as a bearer token when present) |
//! | `temperature` | server default |
//! | `timeout_seconds` | 30 |
//! | `requests_per_minute` | unlimited |
//!
//! ```rust,no_run
//! use cortex_runtime::llm::LlmDriver;
//!
//! let driver = LlmDriver::new("http://localhost:11434", "llama3.2");
//! // Requires a running model server.
//! // let actions = driver.ask("INPUTS:\naudio: hello", &[]).await;
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_history::Summarizer;
use cortex_types::{Action, ChatMessage, CortexError, CortexOutput, Role};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output rules appended to every system message sent by the driver.
pub const RESPONSE_GUIDELINES: &str = "\
## Response format
- Reply with a single JSON object: {\"actions\": [{\"type\": ..., \"value\": ...}]}.
- Use only action types listed under AVAILABLE ACTIONS.
- An empty action list is allowed when nothing should be done.
- Do not repeat the same action more than 3 times in a row.";

const SUMMARY_INSTRUCTION: &str = "Summarize the following robot interaction in two or three \
sentences, keeping locations, people and unfinished tasks. Reply with plain text only.";

/// Asks a language model for the next actions.
#[async_trait]
pub trait Llm: Send + Sync {
    /// `None` on any failure: transport, parsing or schema mismatch.
    async fn ask(&self, prompt: &str, history: &[ChatMessage]) -> Option<Vec<Action>>;

    /// A summarizer backed by the same model, when it can provide one.
    fn summarizer(&self) -> Option<Arc<dyn Summarizer>> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// Async chat-completions client.  Clones share the HTTP pool and the rate
/// limiter.
#[derive(Clone)]
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    timeout: Duration,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    client: reqwest::Client,
}

impl LlmDriver {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            temperature: None,
            timeout: DEFAULT_TIMEOUT,
            limiter: None,
            client: reqwest::Client::new(),
        }
    }

    /// Build from a merged component config (see the module table).
    pub fn from_config(config: &Map<String, Value>) -> Self {
        let text = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let mut driver = Self::new(
            text("base_url").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            text("model").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        );
        driver.api_key = text("api_key");
        driver.temperature = config.get("temperature").and_then(Value::as_f64);
        if let Some(secs) = config
            .get("timeout_seconds")
            .and_then(Value::as_f64)
            .filter(|s| s.is_finite() && *s > 0.0)
        {
            driver.timeout = Duration::from_secs_f64(secs);
        }
        if let Some(rpm) = config
            .get("requests_per_minute")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
        {
            driver = driver.with_rate_limit(rpm);
        }
        driver
    }

    /// Cap requests per minute; `0` removes the cap.
    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.limiter = NonZeroU32::new(requests_per_minute)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the assistant's reply text.
    ///
    /// # Errors
    ///
    /// [`CortexError::Inference`] on transport failure, non-success status,
    /// timeout or an empty `choices` array.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        structured: bool,
    ) -> Result<String, CortexError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let messages = with_guidelines(messages, structured);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: false,
            temperature: self.temperature,
            response_format: structured.then(|| ResponseFormat {
                kind: "json_schema",
                json_schema: serde_json::to_value(schema_for!(CortexOutput))
                    .unwrap_or(Value::Null),
            }),
        };

        let mut request = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CortexError::Inference(format!("request to {url} failed: {e}")))?
            .json()
            .await
            .map_err(|e| CortexError::Inference(format!("unexpected response body: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CortexError::Inference("empty choices array".into()))
    }
}

impl std::fmt::Debug for LlmDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmDriver")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field(
                "api_key",
                if self.api_key.is_some() {
                    &"<redacted>"
                } else {
                    &"<not set>"
                },
            )
            .field("timeout", &self.timeout)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

#[async_trait]
impl Llm for LlmDriver {
    async fn ask(&self, prompt: &str, history: &[ChatMessage]) -> Option<Vec<Action>> {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));
        debug!(model = %self.model, messages = messages.len(), "querying model");
        let reply = match self.complete(&messages, true).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(model = %self.model, error = %e, "LLM request failed");
                return None;
            }
        };
        match parse_actions(&reply) {
            Ok(actions) => {
                info!(model = %self.model, count = actions.len(), "LLM chose actions");
                Some(actions)
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "LLM reply rejected");
                None
            }
        }
    }

    fn summarizer(&self) -> Option<Arc<dyn Summarizer>> {
        Some(Arc::new(self.clone()))
    }
}

#[async_trait]
impl Summarizer for LlmDriver {
    async fn summarize(&self, messages: &[ChatMessage]) -> Result<String, CortexError> {
        let transcript = messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = [
            ChatMessage::system(SUMMARY_INSTRUCTION),
            ChatMessage::user(transcript),
        ];
        let summary = self.complete(&request, false).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CortexError::Inference("empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Append [`RESPONSE_GUIDELINES`] to every system message, or prepend one
/// when there is none.  Unstructured requests are passed through.
pub fn with_guidelines(messages: &[ChatMessage], structured: bool) -> Vec<ChatMessage> {
    if !structured {
        return messages.to_vec();
    }
    let mut out: Vec<ChatMessage> = messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(format!("{}\n\n{}", m.content, RESPONSE_GUIDELINES)),
            _ => m.clone(),
        })
        .collect();
    if !out.iter().any(|m| m.role == Role::System) {
        out.insert(0, ChatMessage::system(RESPONSE_GUIDELINES));
    }
    out
}

/// Parse a model reply into actions.  Accepts the bare JSON object or one
/// wrapped in prose or a code fence.
pub fn parse_actions(reply: &str) -> Result<Vec<Action>, CortexError> {
    let trimmed = reply.trim();
    if let Ok(output) = serde_json::from_str::<CortexOutput>(trimmed) {
        return Ok(output.actions);
    }
    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(CortexError::Inference("reply contains no JSON object".into()));
    };
    if end < start {
        return Err(CortexError::Inference("reply contains no JSON object".into()));
    }
    serde_json::from_str::<CortexOutput>(&trimmed[start..=end])
        .map(|o| o.actions)
        .map_err(|e| CortexError::Inference(format!("reply does not match schema: {e}")))
}
