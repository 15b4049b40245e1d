//! Streaming chat completions against OpenAI-compatible endpoints.
//!
//! A [`ChatBackend`] turns a transcript plus system instruction into a stream
//! of text fragments. The conversation session tries the primary backend and
//! falls back to the secondary one with the same history.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use callie_core::types::{Role, Turn};
use callie_core::{CallieError, Result};

use crate::config::{BackendConfig, LlmConfig};

/// Text fragments in arrival order. An `Err` item ends the stream.
pub type FragmentStream = BoxStream<'static, Result<String>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Maximum gap between two SSE events before the stream counts as stalled.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a backend needs for one reply.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short label for logs, e.g. `primary`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Start a streamed reply. Errors before the first fragment are returned
    /// directly; later failures arrive as an `Err` item.
    async fn stream_reply(&self, request: &CompletionRequest) -> Result<FragmentStream>;
}

/// Primary and fallback backends, tried in that order.
#[derive(Clone)]
pub struct Backends {
    pub primary: std::sync::Arc<dyn ChatBackend>,
    pub fallback: std::sync::Arc<dyn ChatBackend>,
}

impl Backends {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            primary: std::sync::Arc::new(OpenAiCompatible::new("primary", &config.primary)),
            fallback: std::sync::Arc::new(OpenAiCompatible::new("fallback", &config.fallback)),
        }
    }

    pub fn in_order(&self) -> [&dyn ChatBackend; 2] {
        [self.primary.as_ref(), self.fallback.as_ref()]
    }
}

/// Any server speaking the `/chat/completions` SSE protocol (OpenAI, Ollama, ...).
pub struct OpenAiCompatible {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatible {
    pub fn new(name: impl Into<String>, config: &BackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn request_body<'a>(model: &'a str, request: &'a CompletionRequest) -> ChatRequestBody<'a> {
    let mut messages = Vec::with_capacity(request.turns.len() + 1);
    messages.push(ChatMessage {
        role: "system",
        content: &request.system,
    });
    messages.extend(request.turns.iter().map(|t| ChatMessage {
        role: role_str(t.role),
        content: &t.content,
    }));
    ChatRequestBody {
        model,
        messages,
        max_tokens: request.max_tokens,
        stream: true,
    }
}

/// Outcome of one SSE `data:` payload.
#[derive(Debug, PartialEq)]
enum ChunkEvent {
    Fragment(String),
    Skip,
    Done,
}

fn parse_chunk(service: &str, data: &str) -> Result<ChunkEvent> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(ChunkEvent::Done);
    }
    if data.is_empty() {
        return Ok(ChunkEvent::Skip);
    }
    let body: ChunkBody = serde_json::from_str(data)
        .map_err(|e| CallieError::vendor(service, None, format!("bad stream chunk: {e}")))?;
    if let Some(err) = body.error {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(CallieError::vendor(service, None, message));
    }
    match body.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(ChunkEvent::Fragment(text)),
        _ => Ok(ChunkEvent::Skip),
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_reply(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let service = format!("llm:{}", self.name);
        debug!("{service}: POST {url} model={} turns={}", self.model, request.turns.len());

        let mut builder = self.client.post(&url).json(&request_body(&self.model, request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| CallieError::transport(&service, e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CallieError::vendor(&service, Some(status.as_u16()), text));
        }

        let events = resp.bytes_stream().eventsource();
        let stream = futures_util::stream::unfold(
            (events, service, false),
            |(mut events, service, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    let next = match tokio::time::timeout(IDLE_TIMEOUT, events.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            let err = CallieError::timeout(format!("{service} stream"), IDLE_TIMEOUT);
                            return Some((Err(err), (events, service, true)));
                        }
                    };
                    let event = match next {
                        // Ending without [DONE] still counts as a finished reply.
                        None => return None,
                        Some(Err(e)) => {
                            warn!("{service}: stream error: {e}");
                            let err = CallieError::vendor(&service, None, format!("stream error: {e}"));
                            return Some((Err(err), (events, service, true)));
                        }
                        Some(Ok(event)) => event,
                    };
                    trace!("{service}: SSE {:?}", event.data);
                    match parse_chunk(&service, &event.data) {
                        Ok(ChunkEvent::Fragment(text)) => {
                            return Some((Ok(text), (events, service, false)));
                        }
                        Ok(ChunkEvent::Skip) => continue,
                        Ok(ChunkEvent::Done) => return None,
                        Err(err) => return Some((Err(err), (events, service, true))),
                    }
                }
            },
        );
        Ok(stream.boxed())
    }
}
