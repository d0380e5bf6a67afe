//! LLM proxy scenarios: the tool loop (S5), retry exhaustion (S7),
//! token accounting, and streaming drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tfo_mcp::claude::{
    ApiError, ApiErrorKind, ClaudeApi, ClaudeRequest, ClaudeResponse, ProxyConfig, StreamDelta,
    StreamEvent, Usage,
};
use tfo_mcp::content::{ContentBlock, Message};
use tfo_mcp::conversation::Conversation;
use tfo_mcp::protocol::CallToolResult;
use tfo_mcp::session::ClientInfo;
use tfo_mcp::tool::ToolBuilder;
use tfo_mcp::values::{Model, Role, StopReason};
use tfo_mcp::{ClaudeProxy, Session};

/// Upstream double replaying scripted non-streaming outcomes and
/// scripted event streams.
struct ScriptedApi {
    outcomes: Mutex<VecDeque<Result<ClaudeResponse, ApiError>>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<ClaudeRequest>>,
}

impl ScriptedApi {
    fn new(outcomes: Vec<Result<ClaudeResponse, ApiError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_streams(streams: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            streams: Mutex::new(streams.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> ClaudeRequest {
        self.requests.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl ClaudeApi for ScriptedApi {
    async fn create_message(
        &self,
        request: &ClaudeRequest,
        _cancel: &CancellationToken,
    ) -> Result<ClaudeResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::server("script exhausted")))
    }

    async fn create_message_stream(
        &self,
        request: &ClaudeRequest,
        _cancel: &CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::server("stream script exhausted"))?;

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn count_tokens(&self, _request: &ClaudeRequest) -> Result<u64, ApiError> {
        Ok(7)
    }
}

fn ready_session() -> Arc<Session> {
    let session = Arc::new(Session::new());
    session
        .initialize(
            ClientInfo {
                name: "test".to_string(),
                version: "1.0".to_string(),
            },
            "2024-11-05",
        )
        .unwrap();
    session.mark_ready().unwrap();
    session
}

fn text_response(text: &str, stop_reason: StopReason, usage: Usage) -> ClaudeResponse {
    ClaudeResponse {
        id: "msg".to_string(),
        model: Model::Sonnet4.as_str().to_string(),
        content: vec![ContentBlock::text(text)],
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

/// S5: one tool-use turn resolved through the session's registry, tool
/// result fed back in order with the original id, terminal turn ends
/// the loop.
#[tokio::test]
async fn weather_tool_loop() {
    let tool_turn = ClaudeResponse {
        id: "msg_1".to_string(),
        model: Model::Sonnet4.as_str().to_string(),
        content: vec![ContentBlock::tool_use(
            "t1",
            "get_weather",
            json!({"city": "SF"}),
        )],
        stop_reason: StopReason::ToolUse,
        stop_sequence: None,
        usage: Usage {
            input_tokens: 12,
            output_tokens: 6,
        },
    };
    let final_turn = text_response(
        "65F sunny",
        StopReason::EndTurn,
        Usage {
            input_tokens: 20,
            output_tokens: 8,
        },
    );

    let api = Arc::new(ScriptedApi::new(vec![Ok(tool_turn), Ok(final_turn)]));
    let proxy = ClaudeProxy::new(api.clone());

    let session = ready_session();
    session
        .register_tool(
            ToolBuilder::new("get_weather")
                .description("Look up the weather")
                .raw_handler(|_| async { Ok(CallToolResult::text("65F sunny")) })
                .unwrap(),
        )
        .unwrap();

    let conversation = Conversation::new(session.id(), Model::Sonnet4);
    conversation
        .register_tool(session.tool("get_weather").unwrap())
        .unwrap();
    conversation
        .add_message(Message::user_text("weather?"))
        .unwrap();

    let response = proxy
        .execute(&session, &conversation, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "65F sunny");

    // user, assistant(tool_use), user(tool_result), assistant(text)
    let messages = conversation.messages();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[2].role, Role::User);
    assert_eq!(messages[3].role, Role::Assistant);
    match &messages[2].content[0] {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_use_id, "t1");
            assert_eq!(content, "65F sunny");
            assert!(!is_error);
        }
        other => panic!("expected tool result, got {:?}", other),
    }

    // The second upstream call carried the extended conversation and the
    // tool definitions.
    assert_eq!(api.calls(), 2);
    let second = api.last_request();
    assert_eq!(second.messages.len(), 3);
    assert_eq!(second.tools.len(), 1);
    assert_eq!(second.tools[0].name, "get_weather");

    // Invariant 7: totals sum both calls' usage.
    assert_eq!(conversation.total_tokens(), 18 + 28);
}

/// Invariant 5: k tool uses produce exactly k tool results, ids in
/// order.
#[tokio::test]
async fn multiple_tool_uses_preserve_order() {
    let tool_turn = ClaudeResponse {
        id: "msg_1".to_string(),
        model: Model::Sonnet4.as_str().to_string(),
        content: vec![
            ContentBlock::tool_use("t1", "alpha", json!({})),
            ContentBlock::tool_use("t2", "missing", json!({})),
            ContentBlock::tool_use("t3", "alpha", json!({})),
        ],
        stop_reason: StopReason::ToolUse,
        stop_sequence: None,
        usage: Usage::default(),
    };
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(tool_turn),
        Ok(text_response("done", StopReason::EndTurn, Usage::default())),
    ]));
    let proxy = ClaudeProxy::new(api);

    let session = ready_session();
    session
        .register_tool(
            ToolBuilder::new("alpha")
                .raw_handler(|_| async { Ok(CallToolResult::text("ok")) })
                .unwrap(),
        )
        .unwrap();

    let conversation = Conversation::new(session.id(), Model::Sonnet4);
    conversation.add_message(Message::user_text("go")).unwrap();

    proxy
        .execute(&session, &conversation, &CancellationToken::new())
        .await
        .unwrap();

    let messages = conversation.messages();
    let results = &messages[2].content;
    assert_eq!(results.len(), 3);

    let ids: Vec<&str> = results
        .iter()
        .map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
            other => panic!("expected tool result, got {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);

    match &results[1] {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert_eq!(content, "tool not found");
            assert!(is_error);
        }
        other => panic!("expected tool result, got {:?}", other),
    }
}

/// S7: rate-limited three times with maxRetries=3 yields a
/// retry-exhausted rate-limit error and no partial assistant message.
#[tokio::test]
async fn retry_exhaustion() {
    let api = Arc::new(ScriptedApi::new(vec![
        Err(ApiError::rate_limited("1")),
        Err(ApiError::rate_limited("2")),
        Err(ApiError::rate_limited("3")),
    ]));
    let proxy = ClaudeProxy::new(api.clone()).with_config(ProxyConfig {
        max_retries: 3,
        retry_delay: std::time::Duration::from_millis(1),
        ..ProxyConfig::default()
    });

    let session = ready_session();
    let conversation = Conversation::new(session.id(), Model::Sonnet4);
    conversation.add_message(Message::user_text("hi")).unwrap();

    let err = proxy
        .execute(&session, &conversation, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ApiErrorKind::RateLimited);
    assert!(err.message.contains("max retries exceeded"));
    assert_eq!(api.calls(), 3);
    assert_eq!(conversation.message_count(), 1);
    assert_eq!(conversation.total_tokens(), 0);
}

/// Streaming: events arrive in upstream order, the assistant message is
/// assembled and appended, and the sequence terminates.
#[tokio::test]
async fn streaming_single_turn() {
    let events = vec![
        StreamEvent::MessageStart {
            id: "msg_1".to_string(),
            model: Model::Sonnet4.as_str().to_string(),
        },
        StreamEvent::ContentBlockStart {
            index: 0,
            block: ContentBlock::text(""),
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta {
                text: Some("65F ".to_string()),
                partial_json: None,
            },
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta {
                text: Some("sunny".to_string()),
                partial_json: None,
            },
        },
        StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::EndTurn),
            usage: Usage {
                input_tokens: 0,
                output_tokens: 11,
            },
        },
        StreamEvent::MessageStop,
    ];
    let api = Arc::new(ScriptedApi::with_streams(vec![events]));
    let proxy = ClaudeProxy::new(api);

    let session = ready_session();
    let conversation = Arc::new(Conversation::new(session.id(), Model::Sonnet4));
    conversation
        .add_message(Message::user_text("weather?"))
        .unwrap();

    let mut stream = proxy
        .execute_streaming(
            session.clone(),
            conversation.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = stream.recv().await {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(StreamEvent::MessageStart { .. })));
    assert!(matches!(seen.last(), Some(StreamEvent::MessageStop)));

    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(
        tfo_mcp::content::extract_text(&messages[1].content),
        "65F sunny"
    );
    assert_eq!(conversation.total_tokens(), 11);
}

/// Streaming with a tool-use turn: the sequence interleaves both
/// upstream calls, tool results are fed back, and only the final turn
/// emits MessageStop.
#[tokio::test]
async fn streaming_tool_loop() {
    let first_turn = vec![
        StreamEvent::MessageStart {
            id: "msg_1".to_string(),
            model: Model::Sonnet4.as_str().to_string(),
        },
        StreamEvent::ContentBlockStart {
            index: 0,
            block: ContentBlock::tool_use("t1", "get_weather", json!({})),
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta {
                text: None,
                partial_json: Some("{\"city\":\"SF\"}".to_string()),
            },
        },
        StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::ToolUse),
            usage: Usage {
                input_tokens: 0,
                output_tokens: 5,
            },
        },
        StreamEvent::MessageStop,
    ];
    let second_turn = vec![
        StreamEvent::MessageStart {
            id: "msg_2".to_string(),
            model: Model::Sonnet4.as_str().to_string(),
        },
        StreamEvent::ContentBlockStart {
            index: 0,
            block: ContentBlock::text(""),
        },
        StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta {
                text: Some("65F sunny".to_string()),
                partial_json: None,
            },
        },
        StreamEvent::MessageDelta {
            stop_reason: Some(StopReason::EndTurn),
            usage: Usage {
                input_tokens: 0,
                output_tokens: 4,
            },
        },
        StreamEvent::MessageStop,
    ];
    let api = Arc::new(ScriptedApi::with_streams(vec![first_turn, second_turn]));
    let proxy = ClaudeProxy::new(api.clone());

    let session = ready_session();
    session
        .register_tool(
            ToolBuilder::new("get_weather")
                .raw_handler(|_| async { Ok(CallToolResult::text("65F sunny")) })
                .unwrap(),
        )
        .unwrap();

    let conversation = Arc::new(Conversation::new(session.id(), Model::Sonnet4));
    conversation
        .add_message(Message::user_text("weather?"))
        .unwrap();

    let mut stream = proxy
        .execute_streaming(
            session.clone(),
            conversation.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = stream.recv().await {
        seen.push(event);
    }

    let stops = seen
        .iter()
        .filter(|e| matches!(e, StreamEvent::MessageStop))
        .count();
    assert_eq!(stops, 1, "only the terminal turn emits MessageStop");

    let starts = seen
        .iter()
        .filter(|e| matches!(e, StreamEvent::MessageStart { .. }))
        .count();
    assert_eq!(starts, 2, "both upstream turns are interleaved");

    assert_eq!(api.calls(), 2);

    // user, assistant(tool_use), user(tool_result), assistant(text)
    let messages = conversation.messages();
    assert_eq!(messages.len(), 4);
    match &messages[1].content[0] {
        ContentBlock::ToolUse { id, input, .. } => {
            assert_eq!(id, "t1");
            assert_eq!(input, &json!({"city": "SF"}));
        }
        other => panic!("expected tool use, got {:?}", other),
    }
    assert_eq!(conversation.total_tokens(), 9);
}

/// CountTokens is pure: it queries the upstream counter and leaves the
/// conversation untouched.
#[tokio::test]
async fn count_tokens_is_pure() {
    let api = Arc::new(ScriptedApi::new(vec![]));
    let proxy = ClaudeProxy::new(api);

    let session = ready_session();
    let conversation = Conversation::new(session.id(), Model::Sonnet4);
    conversation.add_message(Message::user_text("hi")).unwrap();

    let count = proxy.count_tokens(&conversation).await.unwrap();
    assert_eq!(count, 7);
    assert_eq!(conversation.message_count(), 1);
    assert_eq!(conversation.total_tokens(), 0);
}

/// Invariant 7 across several calls: totalTokens equals the sum of
/// every call's input and output tokens.
#[tokio::test]
async fn token_totals_accumulate() {
    let api = Arc::new(ScriptedApi::new(vec![
        Ok(text_response(
            "a",
            StopReason::EndTurn,
            Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
        )),
        Ok(text_response(
            "b",
            StopReason::EndTurn,
            Usage {
                input_tokens: 5,
                output_tokens: 6,
            },
        )),
    ]));
    let proxy = ClaudeProxy::new(api);

    let session = ready_session();
    let conversation = Conversation::new(session.id(), Model::Sonnet4);
    conversation.add_message(Message::user_text("one")).unwrap();

    proxy
        .execute(&session, &conversation, &CancellationToken::new())
        .await
        .unwrap();

    conversation.add_message(Message::user_text("two")).unwrap();
    proxy
        .execute(&session, &conversation, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(conversation.total_tokens(), 3 + 4 + 5 + 6);
}
