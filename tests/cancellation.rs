//! Cancellation semantics (S6).

mod common;

use std::time::Duration;

use serde_json::json;

use common::{handshake, spawn_server};
use tfo_mcp::protocol::CallToolResult;
use tfo_mcp::tool::ToolBuilder;

/// S6: cancelling an in-flight tools/call produces a prompt -32009
/// response for the same id.
#[tokio::test]
async fn cancel_in_flight_request() {
    let mut server = spawn_server();
    server.dispatcher.set_ready_hook(|session| {
        session
            .register_tool(
                ToolBuilder::new("sleepy")
                    .raw_handler(|_| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(CallToolResult::text("done"))
                    })
                    .unwrap(),
            )
            .unwrap();
    });
    handshake(&mut server.client).await;

    server.client
        .send(json!({
            "jsonrpc": "2.0", "id": 42, "method": "tools/call",
            "params": {"name": "sleepy", "arguments": {}}
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    server.client
        .send(json!({
            "jsonrpc": "2.0", "method": "notifications/cancelled",
            "params": {"requestId": 42, "reason": "user aborted"}
        }))
        .await;

    let response = tokio::time::timeout(Duration::from_millis(500), server.client.recv())
        .await
        .expect("cancellation response must arrive promptly");
    assert_eq!(response["id"], 42);
    assert_eq!(response["error"]["code"], -32009);
}

/// Cancelling an unknown request id is a harmless no-op.
#[tokio::test]
async fn cancel_unknown_request_is_noop() {
    let mut server = spawn_server();
    handshake(&mut server.client).await;

    server.client
        .send(json!({
            "jsonrpc": "2.0", "method": "notifications/cancelled",
            "params": {"requestId": 999}
        }))
        .await;

    server.client
        .send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await;
    let response = server.client.recv().await;
    assert_eq!(response["id"], 1);
    assert!(response.get("result").is_some());
}

/// A request that completes before the cancellation arrives keeps its
/// original response; the late cancel does nothing.
#[tokio::test]
async fn late_cancel_after_completion() {
    let mut server = spawn_server();
    handshake(&mut server.client).await;

    server.client
        .send(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}))
        .await;
    let response = server.client.recv().await;
    assert!(response.get("result").is_some());

    server.client
        .send(json!({
            "jsonrpc": "2.0", "method": "notifications/cancelled",
            "params": {"requestId": 7}
        }))
        .await;

    // The connection is still healthy and no duplicate response shows up.
    server.client
        .send(json!({"jsonrpc": "2.0", "id": 8, "method": "ping"}))
        .await;
    let next = server.client.recv().await;
    assert_eq!(next["id"], 8);
}
