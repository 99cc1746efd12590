//! `/v1/chat/completions` handler
//!
//! Wires the core collaborators together for a single request: the Risk
//! Classifier rewrites the outgoing prompt, the Refresh Coordinator
//! guarantees a valid access token, an `UpstreamTurn` collaborator sends the
//! turn to the vendor backend and hands back its decoded SSE frames, and the
//! Stream Adaptor turns those frames into OpenAI-shaped `choices[].delta`
//! events. A full OpenAI request/response schema, and the vendor's wire
//! encoding, are both out of this system's scope — the types below are the
//! minimal shape needed to drive the core, not a full translation layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use warp_pool::RefreshCoordinator;
use warp_stream::StreamAdaptor;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatCompletionRequest {
    /// The most recent `user`-role message, or the last message of any
    /// role if none is tagged `user`.
    fn last_user_message(&self) -> Result<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .or_else(|| self.messages.last())
            .map(|m| m.content.as_str())
            .ok_or_else(|| Error::InvalidRequest("messages must not be empty".into()))
    }
}

/// The part of the vendor backend this system actually depends on: send one
/// turn, get back the upstream's decoded SSE frames. The vendor's protobuf
/// request encoding and transport details are an external collaborator;
/// `HttpUpstream` below is a minimal, swappable implementation of this
/// boundary.
#[async_trait::async_trait]
pub trait UpstreamTurn: Send + Sync {
    async fn send_turn(
        &self,
        access_token: &str,
        system_prompt: &str,
        message: &str,
    ) -> Result<Vec<Value>>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait::async_trait]
impl UpstreamTurn for HttpUpstream {
    async fn send_turn(
        &self,
        access_token: &str,
        system_prompt: &str,
        message: &str,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/api/warp/send_stream", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({
                "system_prompt": system_prompt,
                "message": message,
            }))
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("upstream returned {status}: {body}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Upstream(format!("reading upstream body failed: {e}")))?;

        Ok(decode_sse_frames(&body))
    }
}

/// Parse an SSE body into its decoded `data:` frames, skipping the
/// `[DONE]` sentinel and any line that fails to JSON-parse (a malformed
/// frame is dropped rather than aborting the whole turn).
fn decode_sse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .collect()
}

/// Process-wide request/error tallies, shared between the chat handler and
/// `/health`, which reports "requests served".
#[derive(Default)]
pub struct RequestCounters {
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

#[derive(Clone)]
pub struct ChatState {
    pub coordinator: Arc<RefreshCoordinator>,
    pub upstream: Arc<dyn UpstreamTurn>,
    pub max_retries: u32,
    pub counters: Arc<RequestCounters>,
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<ChatState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response> {
    state.counters.requests_total.fetch_add(1, Ordering::Relaxed);
    let counters = state.counters.clone();

    handle_chat_completion(state, request).await.inspect_err(|_| {
        counters.errors_total.fetch_add(1, Ordering::Relaxed);
    })
}

async fn handle_chat_completion(state: ChatState, request: ChatCompletionRequest) -> Result<Response> {
    let user_message = request.last_user_message()?.to_string();

    let risk_score = warp_stream::score(&user_message);
    let outgoing_message = warp_stream::transform(&user_message, risk_score);
    let system_prompt = warp_stream::system_prompt_for(&user_message);

    if risk_score > 0.4 {
        info!(risk_score, "risk classifier rewrote outgoing message");
    }

    let started_at = std::time::Instant::now();
    let access_token = state.coordinator.ensure_valid_access(false).await?;

    let frames = match state
        .upstream
        .send_turn(&access_token, system_prompt, &outgoing_message)
        .await
    {
        Ok(frames) => frames,
        Err(e) => {
            crate::metrics::record_upstream_error("send_turn");
            return Err(e);
        }
    };

    let emitted: Vec<Value> = StreamAdaptor::new(frames.into_iter())
        .with_max_retries(state.max_retries)
        .collect();

    crate::metrics::record_request(200, "POST", started_at.elapsed().as_secs_f64());

    if request.stream {
        Ok(sse_response(emitted))
    } else {
        Ok(Json(collapse_to_completion(&request.model, &emitted)).into_response())
    }
}

/// Render the adaptor's output as an OpenAI-shaped `text/event-stream`
/// body. Frames are already fully computed (the Stream Adaptor is a pure
/// synchronous iterator); this only concerns itself with wire framing,
/// which is why it streams the pre-computed chunks rather than producing
/// them lazily — true token-by-token delivery is the HTTP/transport
/// layer's job, out of this system's scope here.
fn sse_response(events: Vec<Value>) -> Response {
    let mut chunks: Vec<std::result::Result<bytes::Bytes, std::io::Error>> = events
        .into_iter()
        .map(|event| Ok(bytes::Bytes::from(format!("data: {event}\n\n"))))
        .collect();
    chunks.push(Ok(bytes::Bytes::from_static(b"data: [DONE]\n\n")));

    let body = Body::from_stream(stream::iter(chunks));
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Collapse the adaptor's emitted events into one OpenAI-shaped chat
/// completion message, for non-streaming callers.
fn collapse_to_completion(model: &str, events: &[Value]) -> Value {
    let mut content = String::new();
    for event in events {
        if let Some(delta) = event.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            content.push_str(delta);
        } else if let Some(text) = event.pointer("/message/agent_output/text").and_then(Value::as_str) {
            content.push_str(text);
        }
    }

    if content.is_empty() {
        warn!("upstream turn produced no visible content");
    }

    serde_json::json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().as_simple()),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}
