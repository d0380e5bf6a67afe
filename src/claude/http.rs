//! HTTP Claude client
//!
//! Talks to the Anthropic Messages API over `reqwest`. Streaming uses
//! the SSE response body: `data:` lines are parsed into wire events and
//! forwarded through a bounded channel; a slow consumer blocks the
//! producer, and the producer observes cancellation between chunks.
//!
//! Sampling parameters are emitted only when they differ from upstream
//! defaults (temperature 1.0, topP 1.0, topK 0).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::claude::{
    ApiError, ClaudeApi, ClaudeRequest, ClaudeResponse, StreamDelta, StreamEvent, ToolSpec, Usage,
    STREAM_CHANNEL_CAPACITY,
};
use crate::content::{ContentBlock, Message};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// HTTP implementation of [`ClaudeApi`].
pub struct HttpClaudeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpClaudeClient {
    /// Create a client. The API key is required.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_options(api_key, DEFAULT_BASE_URL, Duration::from_secs(30))
    }

    pub fn with_options(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(ApiError::invalid_request("API key is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::server(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    async fn error_from_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        match response.json::<WireErrorEnvelope>().await {
            Ok(envelope) => {
                ApiError::from_error_type(&envelope.error.error_type, envelope.error.message)
                    .with_status(status)
            }
            Err(_) => ApiError::from_status(status, "upstream request failed"),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::timeout(format!("upstream timeout: {}", e))
    } else {
        ApiError::server(format!("upstream request failed: {}", e))
    }
}

#[async_trait]
impl ClaudeApi for HttpClaudeClient {
    async fn create_message(
        &self,
        request: &ClaudeRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError> {
        let body = build_wire_request(request, false);
        let call = async {
            let response = self
                .request("/v1/messages")
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error)?;

            if !response.status().is_success() {
                return Err(Self::error_from_response(response).await);
            }

            let wire: WireResponse = response
                .json()
                .await
                .map_err(|e| ApiError::server(format!("malformed upstream response: {}", e)))?;
            wire.into_domain()
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::cancelled()),
            result = call => result,
        }
    }

    async fn create_message_stream(
        &self,
        request: &ClaudeRequest,
        cancel: &CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError> {
        let body = build_wire_request(request, true);
        let response = self
            .request("/v1/messages")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buf = String::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx.try_send(StreamEvent::Error(ApiError::cancelled()));
                        return;
                    }
                    next = stream.next() => next,
                };

                let Some(chunk) = next else {
                    // Upstream finished without message_stop; nothing more to do.
                    return;
                };

                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(ApiError::server(format!(
                                "stream read failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                buf.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event = match serde_json::from_str::<WireStreamEvent>(data) {
                        Ok(wire) => wire.into_domain(),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable stream frame");
                            continue;
                        }
                    };

                    let Some(event) = event else { continue };
                    let terminal = matches!(
                        event,
                        StreamEvent::MessageStop | StreamEvent::Error(_)
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = tx.try_send(StreamEvent::Error(ApiError::cancelled()));
                            return;
                        }
                        sent = tx.send(event) => {
                            if sent.is_err() {
                                // Consumer dropped the sequence
                                return;
                            }
                        }
                    }

                    if terminal {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn count_tokens(&self, request: &ClaudeRequest) -> Result<u64, ApiError> {
        let body = WireCountRequest {
            model: request.model.as_str().to_string(),
            messages: request.messages.iter().map(wire_message).collect(),
            system: request
                .system
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_str().to_string()),
        };

        let response = self
            .request("/v1/messages/count_tokens")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let counted: WireCountResponse = response
            .json()
            .await
            .map_err(|e| ApiError::server(format!("malformed count response: {}", e)))?;
        Ok(counted.input_tokens)
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<WireBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Image {
        source: WireImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct WireImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct WireCountRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCountResponse {
    input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    content: Vec<WireResponseBlock>,
    stop_reason: String,
    #[serde(default)]
    stop_sequence: Option<String>,
    #[serde(default)]
    usage: Usage,
}

impl WireResponse {
    fn into_domain(self) -> Result<ClaudeResponse, ApiError> {
        let stop_reason = self
            .stop_reason
            .parse()
            .map_err(|_| ApiError::server(format!("unexpected stop reason: {}", self.stop_reason)))?;
        Ok(ClaudeResponse {
            id: self.id,
            model: self.model,
            content: self
                .content
                .into_iter()
                .map(WireResponseBlock::into_domain)
                .collect(),
            stop_reason,
            stop_sequence: self.stop_sequence,
            usage: self.usage,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireResponseBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

impl WireResponseBlock {
    fn into_domain(self) -> ContentBlock {
        match self {
            WireResponseBlock::Text { text } => ContentBlock::Text { text },
            WireResponseBlock::ToolUse { id, name, input } => {
                ContentBlock::ToolUse { id, name, input }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStreamEvent {
    MessageStart {
        message: WireStreamMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireResponseBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireStreamDelta,
    },
    MessageDelta {
        delta: WireMessageDelta,
        #[serde(default)]
        usage: Usage,
    },
    MessageStop,
    Ping,
    Error {
        error: WireErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireStreamMessage {
    id: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

impl WireStreamEvent {
    fn into_domain(self) -> Option<StreamEvent> {
        match self {
            WireStreamEvent::MessageStart { message } => Some(StreamEvent::MessageStart {
                id: message.id,
                model: message.model,
            }),
            WireStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => Some(StreamEvent::ContentBlockStart {
                index,
                block: content_block.into_domain(),
            }),
            WireStreamEvent::ContentBlockDelta { index, delta } => {
                Some(StreamEvent::ContentBlockDelta {
                    index,
                    delta: StreamDelta {
                        text: delta.text,
                        partial_json: delta.partial_json,
                    },
                })
            }
            WireStreamEvent::MessageDelta { delta, usage } => Some(StreamEvent::MessageDelta {
                stop_reason: delta.stop_reason.and_then(|s| s.parse().ok()),
                usage,
            }),
            WireStreamEvent::MessageStop => Some(StreamEvent::MessageStop),
            WireStreamEvent::Ping | WireStreamEvent::Unknown => None,
            WireStreamEvent::Error { error } => Some(StreamEvent::Error(
                ApiError::from_error_type(&error.error_type, error.message),
            )),
        }
    }
}

// =============================================================================
// Request building
// =============================================================================

fn wire_message(message: &Message) -> WireMessage {
    WireMessage {
        role: message.role.to_string(),
        content: message.content.iter().map(wire_block).collect(),
    }
}

fn wire_block(block: &ContentBlock) -> WireBlock {
    match block {
        ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
        ContentBlock::Image { data, mime_type } => WireBlock::Image {
            source: WireImageSource {
                kind: "base64",
                media_type: mime_type.clone(),
                data: data.clone(),
            },
        },
        ContentBlock::ToolUse { id, name, input } => WireBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => WireBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

/// Build the upstream wire request. The system prompt travels as a
/// separate field, never inlined as a message; sampling parameters are
/// emitted only when they differ from upstream defaults.
fn build_wire_request(request: &ClaudeRequest, stream: bool) -> WireRequest {
    WireRequest {
        model: request.model.as_str().to_string(),
        max_tokens: request.max_tokens,
        messages: request.messages.iter().map(wire_message).collect(),
        system: request
            .system
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str().to_string()),
        temperature: (request.temperature > 0.0 && request.temperature != 1.0)
            .then_some(request.temperature),
        top_p: (request.top_p > 0.0 && request.top_p < 1.0).then_some(request.top_p),
        top_k: (request.top_k > 0).then_some(request.top_k),
        stop_sequences: request.stop_sequences.clone(),
        tools: request.tools.clone(),
        stream: stream.then_some(true),
    }
}
