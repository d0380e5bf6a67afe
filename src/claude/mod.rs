//! Upstream Claude API boundary
//!
//! Domain-level request/response types, the streaming event sequence,
//! and the [`ClaudeApi`] trait the proxy drives. The HTTP implementation
//! lives in [`http`]; the orchestration (retry, tool loop, token
//! accounting) lives in [`proxy`].

pub mod error;
pub mod http;
pub mod proxy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::content::{ContentBlock, Message};
use crate::values::{Model, StopReason, SystemPrompt};

pub use error::{ApiError, ApiErrorKind};
pub use http::HttpClaudeClient;
pub use proxy::{ClaudeProxy, ProxyConfig};

/// Output token budget used when a conversation does not set one.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Capacity of the stream event channel between the upstream producer
/// and the consumer. A slow consumer blocks the producer (backpressure).
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// A tool definition in upstream wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// A fully built upstream request.
#[derive(Debug, Clone)]
pub struct ClaudeRequest {
    pub model: Model,
    pub messages: Vec<Message>,
    pub system: Option<SystemPrompt>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub stop_sequences: Vec<String>,
    pub tools: Vec<ToolSpec>,
}

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A complete upstream response.
#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl ClaudeResponse {
    /// Concatenated text of the response content.
    pub fn text(&self) -> String {
        crate::content::extract_text(&self.content)
    }

    pub fn has_tool_use(&self) -> bool {
        crate::content::has_tool_use(&self.content)
    }
}

/// Incremental delta within a content block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub text: Option<String>,
    pub partial_json: Option<String>,
}

/// One event on the lazy, finite, single-consumer stream sequence.
///
/// Delivery order equals upstream emission order. The sequence ends with
/// `MessageStop` on success or `Error` on failure, and is never
/// restartable.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart {
        id: String,
        model: String,
    },
    ContentBlockStart {
        index: usize,
        block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: StreamDelta,
    },
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Usage,
    },
    MessageStop,
    Error(ApiError),
}

/// The upstream LLM boundary.
///
/// Implementations must honor the cancellation token at every suspension
/// point, including per-chunk stream reads.
#[async_trait]
pub trait ClaudeApi: Send + Sync {
    /// One non-streaming message call. No retry; the proxy owns retry
    /// policy.
    async fn create_message(
        &self,
        request: &ClaudeRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError>;

    /// Open a streaming message call. The returned receiver is the
    /// single-consumer event sequence; dropping it releases the
    /// producer.
    async fn create_message_stream(
        &self,
        request: &ClaudeRequest,
        cancel: &CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError>;

    /// Count input tokens for a request without creating a message.
    async fn count_tokens(&self, request: &ClaudeRequest) -> Result<u64, ApiError>;
}
