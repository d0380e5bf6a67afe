//! Shared test harness: a dispatcher served over in-memory pipes and a
//! line-oriented test client.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use tfo_mcp::{Dispatcher, DispatcherConfig, Session, StdioTransport};

pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl TestClient {
    pub async fn send(&mut self, value: Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    pub async fn send_raw(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "server closed the connection");
        serde_json::from_str(&line).unwrap()
    }
}

pub struct TestServer {
    pub client: TestClient,
    pub dispatcher: Dispatcher,
    pub serve: tokio::task::JoinHandle<tfo_mcp::Result<()>>,
}

pub fn spawn_server() -> TestServer {
    let config = DispatcherConfig::default();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let transport = Arc::new(StdioTransport::new(server_read, server_write));

    let dispatcher = Dispatcher::new(transport, Arc::new(Session::new()), config);
    let serve = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.serve().await })
    };

    let (client_read, client_write) = tokio::io::split(client_io);
    TestServer {
        client: TestClient {
            reader: BufReader::new(client_read),
            writer: client_write,
        },
        dispatcher,
        serve,
    }
}

/// Run the full handshake: initialize, check the response, send
/// `notifications/initialized`, and ping once so the caller knows the
/// server has processed the notification.
pub async fn handshake(client: &mut TestClient) {
    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "c", "version": "1.0"}
            }
        }))
        .await;

    let response = client.recv().await;
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");

    client
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    client
        .send(json!({"jsonrpc": "2.0", "id": "handshake-sync", "method": "ping"}))
        .await;
    let pong = client.recv().await;
    assert_eq!(pong["id"], "handshake-sync");
}
