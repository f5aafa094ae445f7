//! Reasoning backend adapter: provider abstraction, retry with backoff, and
//! JSON extraction from model replies.
//!
//! Providers only move text. [`RemoteAnalyst`] owns the retry policy and turns
//! the reply into a `serde_json::Value` (tolerating a markdown code fence);
//! validation of that value happens in [`super::validate`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AiConfig, Catalog};

const USER_AGENT: &str = "signal-digest/0.1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Backoff exponent cap (base × 2^10).
const MAX_BACKOFF_SHIFT: u32 = 10;

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("rate limited by backend")]
    RateLimited,
    #[error("backend server error (HTTP {0})")]
    Server(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected response shape: {0}")]
    Malformed(String),
    #[error("backend not configured")]
    NotConfigured,
}

impl BackendError {
    /// Worth another attempt after a backoff delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited | BackendError::Server(_) | BackendError::Transport(_)
        )
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 {
            BackendError::RateLimited
        } else if status.is_server_error() {
            BackendError::Server(status.as_u16())
        } else {
            BackendError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) if s.is_server_error() => BackendError::Server(s.as_u16()),
            _ => BackendError::Transport(e.to_string()),
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction
// ------------------------------------------------------------

/// One text completion: system prompt + user prompt in, model text out.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;
    /// Configured and able to take requests.
    fn available(&self) -> bool;
    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError>;
}

pub type DynBackend = Arc<dyn ReasoningBackend>;

fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(90))
        .build()
        .context("building reqwest client")
}

fn trim_base(url: Option<&str>, default: &str) -> String {
    url.unwrap_or(default).trim_end_matches('/').to_string()
}

/// Anthropic Messages API.
pub struct AnthropicBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(cfg: &AiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_key: cfg.api_key.clone(),
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| ANTHROPIC_DEFAULT_MODEL.to_string()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            base_url: trim_base(cfg.base_url.as_deref(), ANTHROPIC_BASE_URL),
        })
    }
}

#[async_trait]
impl ReasoningBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            system: &'a str,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            #[serde(default)]
            text: Option<String>,
        }

        if self.api_key.is_empty() {
            return Err(BackendError::NotConfigured);
        }
        let req = Req {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: vec![Msg {
                role: "user",
                content: user,
            }],
        };
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        body.content
            .into_iter()
            .find_map(|b| b.text)
            .ok_or_else(|| BackendError::Malformed("no text block in reply".to_string()))
    }
}

/// OpenAI Chat Completions API.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(cfg: &AiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client()?,
            api_key: cfg.api_key.clone(),
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            base_url: trim_base(cfg.base_url.as_deref(), OPENAI_BASE_URL),
        })
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }

        if self.api_key.is_empty() {
            return Err(BackendError::NotConfigured);
        }
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let resp = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, body));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Malformed("no choices in reply".to_string()))
    }
}

/// Never available; used when AI is disabled or has no key.
pub struct DisabledBackend;

#[async_trait]
impl ReasoningBackend for DisabledBackend {
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn available(&self) -> bool {
        false
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, BackendError> {
        Err(BackendError::NotConfigured)
    }
}

/// Deterministic backend for tests and `AI_TEST_MODE=mock`: replays queued
/// replies in order, then repeats `fallback` (or fails) once the queue is empty.
#[derive(Default)]
pub struct ScriptedBackend {
    queue: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same reply for every call.
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(reply.into()),
            ..Self::default()
        }
    }

    pub fn push_reply(self, reply: impl Into<String>) -> Self {
        self.lock_queue().push_back(Ok(reply.into()));
        self
    }

    pub fn push_error(self, err: BackendError) -> Self {
        self.lock_queue().push_back(Err(err));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, BackendError>>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "mock"
    }
    fn available(&self) -> bool {
        true
    }
    async fn complete(&self, _system: &str, user: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut p) = self.prompts.lock() {
            p.push(user.to_string());
        }
        match self.lock_queue().pop_front() {
            Some(r) => r,
            None => self.fallback.clone().ok_or(BackendError::NotConfigured),
        }
    }
}

/// Factory: build a backend according to config and environment.
///
/// * `AI_TEST_MODE=mock` gives a scripted backend answering every request with a
///   fixed single-signal analysis for the fallback category.
/// * Disabled or keyless config gives [`DisabledBackend`].
/// * Otherwise the configured provider.
pub fn build_backend(cfg: &AiConfig, catalog: &Catalog) -> anyhow::Result<DynBackend> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        let category = catalog
            .fallback()
            .map(|c| c.id.clone())
            .unwrap_or_default();
        let reply = serde_json::json!({
            "signal_type": "market-shift",
            "category_matches": [{"category_id": category, "relevance": 0.5}],
            "scores": {
                "revenue_impact": 5,
                "time_sensitivity": 5,
                "strategic_alignment": 5,
                "competitive_pressure": 5
            },
            "headline": "Mock analysis"
        });
        return Ok(Arc::new(ScriptedBackend::always(reply.to_string())));
    }

    if !cfg.usable() {
        return Ok(Arc::new(DisabledBackend));
    }

    match cfg.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicBackend::new(cfg)?)),
        "openai" => Ok(Arc::new(OpenAiBackend::new(cfg)?)),
        other => anyhow::bail!("unsupported AI provider '{other}'"),
    }
}

// ------------------------------------------------------------
// Retry + JSON extraction
// ------------------------------------------------------------

/// What came back from one logical remote request.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Json(Value),
    /// Disabled, permanent error, or retries exhausted.
    Unavailable,
    /// Text came back but is not JSON.
    Unparseable(String),
}

/// Retry policy wrapped around a backend.
#[derive(Clone)]
pub struct RemoteAnalyst {
    backend: DynBackend,
    max_attempts: u32,
    backoff_base: Duration,
}

impl RemoteAnalyst {
    pub fn new(backend: DynBackend, cfg: &AiConfig) -> Self {
        Self {
            backend,
            max_attempts: cfg.max_retries.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }

    pub fn available(&self) -> bool {
        self.backend.available()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Delay before retry number `attempt + 1`: base × 2^attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    pub async fn request(&self, system: &str, user: &str) -> RemoteReply {
        if !self.backend.available() {
            return RemoteReply::Unavailable;
        }
        for attempt in 0..self.max_attempts {
            match self.backend.complete(system, user).await {
                Ok(text) => {
                    return match parse_json_reply(&text) {
                        Ok(v) => RemoteReply::Json(v),
                        Err(e) => {
                            let head: String = text.chars().take(200).collect();
                            tracing::warn!(error = %e, reply = %head, "could not parse backend reply as JSON");
                            RemoteReply::Unparseable(e.to_string())
                        }
                    };
                }
                Err(e) if e.is_transient() => {
                    let last = attempt + 1 >= self.max_attempts;
                    tracing::warn!(
                        backend = self.backend.name(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "transient backend error"
                    );
                    if !last {
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = self.backend.name(), error = %e, "backend request failed");
                    return RemoteReply::Unavailable;
                }
            }
        }
        tracing::warn!(
            backend = self.backend.name(),
            attempts = self.max_attempts,
            "all backend attempts exhausted"
        );
        RemoteReply::Unavailable
    }
}

/// Parse model text as JSON, stripping a surrounding markdown code fence.
pub fn parse_json_reply(text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = text.trim();
    let body = if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        let end = (1..lines.len())
            .rev()
            .find(|&i| lines[i].trim() == "```")
            .unwrap_or(lines.len());
        lines[1.min(end)..end].join("\n")
    } else {
        trimmed.to_string()
    };
    serde_json::from_str(body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_is_stripped() {
        let v = parse_json_reply("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(v["a"], 1);
        let v = parse_json_reply("  [1, 2]  ").unwrap();
        assert_eq!(v, serde_json::json!([1, 2]));
        // unterminated fence: everything after the opening line
        let v = parse_json_reply("```\n{\"b\": true}").unwrap();
        assert_eq!(v["b"], true);
        assert!(parse_json_reply("Sure! Here you go").is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::RateLimited.is_transient());
        assert!(BackendError::Server(503).is_transient());
        assert!(BackendError::Transport("reset".into()).is_transient());
        assert!(!BackendError::Rejected {
            status: 401,
            body: String::new()
        }
        .is_transient());
        assert!(!BackendError::NotConfigured.is_transient());
    }

    #[test]
    fn backoff_doubles_from_base() {
        let cfg = AiConfig {
            backoff_base_ms: 2_000,
            ..AiConfig::default()
        };
        let a = RemoteAnalyst::new(Arc::new(DisabledBackend), &cfg);
        assert_eq!(a.backoff_for(0), Duration::from_secs(2));
        assert_eq!(a.backoff_for(1), Duration::from_secs(4));
        assert_eq!(a.backoff_for(2), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .push_error(BackendError::RateLimited)
                .push_error(BackendError::Server(502))
                .push_reply("{\"ok\": 1}"),
        );
        let cfg = AiConfig {
            max_retries: 3,
            backoff_base_ms: 0,
            ..AiConfig::default()
        };
        let a = RemoteAnalyst::new(backend.clone(), &cfg);
        assert_eq!(a.request("s", "u").await, RemoteReply::Json(serde_json::json!({"ok": 1})));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .push_error(BackendError::Server(500))
                .push_error(BackendError::Server(500))
                .push_reply("{}"),
        );
        let cfg = AiConfig {
            max_retries: 2,
            backoff_base_ms: 0,
            ..AiConfig::default()
        };
        let a = RemoteAnalyst::new(backend.clone(), &cfg);
        assert_eq!(a.request("s", "u").await, RemoteReply::Unavailable);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new().push_error(BackendError::Rejected {
            status: 400,
            body: "bad".into(),
        }));
        let cfg = AiConfig {
            backoff_base_ms: 0,
            ..AiConfig::default()
        };
        let a = RemoteAnalyst::new(backend.clone(), &cfg);
        assert_eq!(a.request("s", "u").await, RemoteReply::Unavailable);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn disabled_backend_is_unavailable_without_calls() {
        let a = RemoteAnalyst::new(Arc::new(DisabledBackend), &AiConfig::default());
        assert!(!a.available());
        assert_eq!(a.request("s", "u").await, RemoteReply::Unavailable);
    }
}
