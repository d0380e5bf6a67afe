//! LLM proxy and tool loop
//!
//! Orchestrates upstream calls for a conversation: builds requests,
//! retries retryable failures with linear backoff, converts assistant
//! `tool_use` turns into local tool invocations, feeds `tool_result`
//! blocks back, and accounts tokens. The loop is bounded so an
//! adversarial model cannot spin forever.
//!
//! The conversation mutex is held only to append; never across an
//! upstream call.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::claude::{
    ApiError, ClaudeApi, ClaudeRequest, ClaudeResponse, StreamEvent, ToolSpec, Usage,
    STREAM_CHANNEL_CAPACITY,
};
use crate::content::{extract_text, tool_use_blocks, ContentBlock, Message};
use crate::conversation::Conversation;
use crate::repository::{AnalyticsEvent, AnalyticsSink, NullAnalyticsSink};
use crate::session::Session;
use crate::telemetry::{NoopTelemetry, TelemetryObserver};
use crate::values::{Role, StopReason};

/// Proxy behavior knobs.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Total upstream attempts per call (first try included).
    pub max_retries: u32,
    /// Base retry delay; the n-th retry waits `retry_delay * n`.
    pub retry_delay: std::time::Duration,
    /// Fallback output budget when a conversation carries none.
    pub default_max_tokens: u32,
    /// Hard cap on tool-use turns within one execute call.
    pub tool_loop_limit: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: std::time::Duration::from_secs(1),
            default_max_tokens: crate::claude::DEFAULT_MAX_TOKENS,
            tool_loop_limit: 16,
        }
    }
}

/// The streaming LLM proxy.
#[derive(Clone)]
pub struct ClaudeProxy {
    api: Arc<dyn ClaudeApi>,
    config: ProxyConfig,
    telemetry: Arc<dyn TelemetryObserver>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl ClaudeProxy {
    pub fn new(api: Arc<dyn ClaudeApi>) -> Self {
        Self {
            api,
            config: ProxyConfig::default(),
            telemetry: Arc::new(NoopTelemetry),
            analytics: Arc::new(NullAnalyticsSink),
        }
    }

    pub fn with_config(mut self, config: ProxyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryObserver>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Translate a conversation into an upstream request.
    ///
    /// Guards: at least one message; a zero `maxTokens` falls back to the
    /// configured default.
    pub fn build_request(&self, conversation: &Conversation) -> Result<ClaudeRequest, ApiError> {
        let messages = conversation.messages();
        if messages.is_empty() {
            return Err(ApiError::invalid_request("conversation has no messages"));
        }

        let max_tokens = match conversation.max_tokens() {
            0 => self.config.default_max_tokens,
            n => n,
        };

        let tools = conversation
            .tools()
            .iter()
            .filter(|t| t.is_enabled())
            .map(|t| {
                let descriptor = t.descriptor();
                ToolSpec {
                    name: descriptor.name,
                    description: descriptor.description,
                    input_schema: descriptor.input_schema,
                }
            })
            .collect();

        Ok(ClaudeRequest {
            model: conversation.model(),
            messages,
            system: conversation.system_prompt(),
            max_tokens,
            temperature: conversation.temperature(),
            top_p: conversation.top_p(),
            top_k: conversation.top_k(),
            stop_sequences: conversation.stop_sequences(),
            tools,
        })
    }

    /// Non-streaming execution with the tool loop.
    ///
    /// Each upstream response is appended to the conversation as an
    /// assistant message. When the stop reason is `tool_use`, every
    /// `ToolUse` block is resolved against the owning session and the
    /// results are fed back as one user message, preserving order and
    /// ids; the loop continues until a terminal stop reason or the
    /// configured bound.
    pub async fn execute(
        &self,
        session: &Session,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError> {
        let span = self.telemetry.span_start("claude.execute");

        let result = self.execute_inner(session, conversation, cancel).await;
        self.telemetry.span_end(span, "claude.execute", result.is_ok());
        result
    }

    async fn execute_inner(
        &self,
        session: &Session,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError> {
        let mut turns = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::cancelled());
            }

            let request = self.build_request(conversation)?;
            let response = self.call_with_retry(&request, cancel).await?;
            self.settle_response(conversation, &response)?;

            if response.stop_reason.is_terminal() || !response.has_tool_use() {
                return Ok(response);
            }

            turns += 1;
            if turns >= self.config.tool_loop_limit {
                tracing::warn!(
                    limit = self.config.tool_loop_limit,
                    "tool loop bound reached; returning last response"
                );
                return Ok(response);
            }

            let results = self
                .run_tools(session, &tool_use_blocks(&response.content), cancel)
                .await?;
            conversation
                .add_message(Message::tool_results(results))
                .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        }
    }

    /// Streaming execution with the tool loop.
    ///
    /// Returns a lazy, finite, single-consumer event sequence that
    /// interleaves upstream chunks across tool-use turns. Intermediate
    /// turns end at their `MessageDelta(stop_reason=tool_use)`; only the
    /// final turn emits `MessageStop`. The consumer must drain or drop
    /// the receiver to release upstream resources.
    pub async fn execute_streaming(
        &self,
        session: Arc<Session>,
        conversation: Arc<Conversation>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError> {
        let request = self.build_request(&conversation)?;
        let first = self.api.create_message_stream(&request, &cancel).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let proxy = self.clone();

        tokio::spawn(async move {
            let mut upstream = first;
            let mut turns = 0u32;

            loop {
                let turn = pump_turn(&tx, &mut upstream, &cancel).await;
                let response = match turn {
                    TurnOutcome::Completed(response) => response,
                    TurnOutcome::Aborted => return,
                };

                if proxy.settle_response(&conversation, &response).is_err() {
                    return;
                }

                if response.stop_reason.is_terminal() || !response.has_tool_use() {
                    // Dropping tx ends the sequence after MessageStop.
                    return;
                }

                turns += 1;
                if turns >= proxy.config.tool_loop_limit {
                    tracing::warn!("tool loop bound reached in streaming mode");
                    let _ = tx.send(StreamEvent::MessageStop).await;
                    return;
                }

                let results = match proxy
                    .run_tools(&session, &tool_use_blocks(&response.content), &cancel)
                    .await
                {
                    Ok(results) => results,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e)).await;
                        return;
                    }
                };
                if conversation
                    .add_message(Message::tool_results(results))
                    .is_err()
                {
                    return;
                }

                let request = match proxy.build_request(&conversation) {
                    Ok(request) => request,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e)).await;
                        return;
                    }
                };
                upstream = match proxy.api.create_message_stream(&request, &cancel).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e)).await;
                        return;
                    }
                };
            }
        });

        Ok(rx)
    }

    /// Count tokens for the conversation's current state. Does not
    /// mutate the conversation.
    pub async fn count_tokens(&self, conversation: &Conversation) -> Result<u64, ApiError> {
        let request = self.build_request(conversation)?;
        self.api.count_tokens(&request).await
    }

    /// Append the assistant turn and account its tokens.
    fn settle_response(
        &self,
        conversation: &Conversation,
        response: &ClaudeResponse,
    ) -> Result<(), ApiError> {
        if !response.content.is_empty() {
            conversation
                .add_message(Message::new(Role::Assistant, response.content.clone()))
                .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        }
        conversation.record_usage(&response.usage);
        self.analytics.record(AnalyticsEvent::ApiRequest {
            model: response.model.clone(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            duration_ms: 0,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn call_with_retry(
        &self,
        request: &ClaudeRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError> {
        let attempts = self.config.max_retries.max(1);
        let mut last: Option<ApiError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay * (attempt - 1);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let started = Instant::now();
            match self.api.create_message(request, cancel).await {
                Ok(response) => {
                    self.telemetry
                        .duration("claude.request", started.elapsed());
                    return Ok(response);
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(attempt, error = %e, "retryable upstream failure");
                    self.telemetry.counter("claude.request.retries", 1);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match last {
            Some(last) => Err(ApiError::retries_exhausted(last)),
            None => Err(ApiError::server("no upstream attempts were made")),
        }
    }

    /// Invoke the tools named by `tool_use` blocks, in order.
    ///
    /// A missing tool and a failed handler both become error-flagged
    /// `ToolResult` blocks; only cancellation aborts the batch.
    async fn run_tools(
        &self,
        session: &Session,
        tool_uses: &[ContentBlock],
        cancel: &CancellationToken,
    ) -> Result<Vec<ContentBlock>, ApiError> {
        let mut results = Vec::with_capacity(tool_uses.len());

        for block in tool_uses {
            let ContentBlock::ToolUse { id, name, input } = block else {
                continue;
            };

            if cancel.is_cancelled() {
                return Err(ApiError::cancelled());
            }

            let started = Instant::now();
            let result = match session.tool(name) {
                Ok(tool) if tool.is_enabled() => {
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::cancelled()),
                        outcome = tool.call(input.clone()) => outcome,
                    };
                    match outcome {
                        Ok(output) => ContentBlock::tool_result(
                            id.clone(),
                            extract_text(&output.content),
                            output.is_error,
                        ),
                        Err(e) => ContentBlock::tool_result(id.clone(), e.to_string(), true),
                    }
                }
                Ok(_) => ContentBlock::tool_result(id.clone(), "tool is disabled", true),
                Err(_) => ContentBlock::tool_result(id.clone(), "tool not found", true),
            };

            let is_error = matches!(&result, ContentBlock::ToolResult { is_error: true, .. });
            self.analytics.record(AnalyticsEvent::ToolCall {
                tool: name.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
                is_error,
                at: Utc::now(),
            });
            self.telemetry.duration("tool.call", started.elapsed());

            results.push(result);
        }

        Ok(results)
    }
}

enum TurnOutcome {
    Completed(ClaudeResponse),
    Aborted,
}

/// Forward one upstream stream to the consumer while assembling the
/// turn's response. The `MessageStop` of a tool-use turn is withheld so
/// the consumer sees one continuous sequence across turns.
async fn pump_turn(
    tx: &mpsc::Sender<StreamEvent>,
    upstream: &mut mpsc::Receiver<StreamEvent>,
    cancel: &CancellationToken,
) -> TurnOutcome {
    let mut id = String::new();
    let mut model = String::new();
    let mut blocks: Vec<(ContentBlock, String)> = Vec::new();
    let mut stop_reason: Option<StopReason> = None;
    let mut usage = Usage::default();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tx.try_send(StreamEvent::Error(ApiError::cancelled()));
                return TurnOutcome::Aborted;
            }
            event = upstream.recv() => event,
        };

        let Some(event) = event else {
            // Producer went away without message_stop.
            return TurnOutcome::Aborted;
        };

        enum Action {
            Forward,
            Stop(ClaudeResponse),
            Abort,
        }

        let action = match &event {
            StreamEvent::MessageStart {
                id: msg_id,
                model: msg_model,
            } => {
                id = msg_id.clone();
                model = msg_model.clone();
                Action::Forward
            }
            StreamEvent::ContentBlockStart { index, block } => {
                while blocks.len() <= *index {
                    blocks.push((ContentBlock::text(""), String::new()));
                }
                blocks[*index].0 = block.clone();
                Action::Forward
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(slot) = blocks.get_mut(*index) {
                    if let Some(text) = &delta.text {
                        if let ContentBlock::Text { text: existing } = &mut slot.0 {
                            existing.push_str(text);
                        }
                    }
                    if let Some(partial) = &delta.partial_json {
                        slot.1.push_str(partial);
                    }
                }
                Action::Forward
            }
            StreamEvent::MessageDelta {
                stop_reason: reason,
                usage: delta_usage,
            } => {
                if reason.is_some() {
                    stop_reason = *reason;
                }
                usage.input_tokens += delta_usage.input_tokens;
                usage.output_tokens += delta_usage.output_tokens;
                Action::Forward
            }
            StreamEvent::MessageStop => {
                let response = ClaudeResponse {
                    id: std::mem::take(&mut id),
                    model: std::mem::take(&mut model),
                    content: finalize_blocks(std::mem::take(&mut blocks)),
                    stop_reason: stop_reason.unwrap_or(StopReason::EndTurn),
                    stop_sequence: None,
                    usage,
                };
                Action::Stop(response)
            }
            StreamEvent::Error(_) => Action::Abort,
        };

        match action {
            Action::Forward => {
                if tx.send(event).await.is_err() {
                    // Consumer dropped the sequence.
                    return TurnOutcome::Aborted;
                }
            }
            Action::Stop(response) => {
                // Withhold MessageStop for tool-use turns; the sequence
                // continues with the next upstream call.
                if response.stop_reason.is_terminal() && tx.send(event).await.is_err() {
                    return TurnOutcome::Aborted;
                }
                return TurnOutcome::Completed(response);
            }
            Action::Abort => {
                let _ = tx.send(event).await;
                return TurnOutcome::Aborted;
            }
        }
    }
}

/// Turn assembled (block, accumulated partial json) pairs into final
/// content blocks.
fn finalize_blocks(blocks: Vec<(ContentBlock, String)>) -> Vec<ContentBlock> {
    blocks
        .into_iter()
        .map(|(block, partial)| match block {
            ContentBlock::ToolUse { id, name, input } => {
                let input = if partial.is_empty() {
                    input
                } else {
                    serde_json::from_str(&partial).unwrap_or(input)
                };
                ContentBlock::ToolUse { id, name, input }
            }
            other => other,
        })
        .collect()
}
