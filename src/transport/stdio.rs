//! Stdio transport for MCP
//!
//! Reads line-delimited JSON-RPC messages from a reader and writes
//! responses to a writer. Messages are UTF-8, one JSON value per line,
//! and must not contain embedded newlines. stderr stays free for
//! logging.
//!
//! Reader and writer sit behind separate async mutexes: only the
//! dispatcher reads, while any task may write; the write lock is held
//! for exactly one marshal+write.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::codec::{self, Inbound};
use crate::error::{Error, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcResponse};
use crate::transport::Transport;

/// Line-delimited transport over any async reader/writer pair.
pub struct StdioTransport<R, W> {
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
    closed: AtomicBool,
}

impl StdioTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// The process stdio transport.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        debug_assert!(!line.contains('\n'), "frame must not contain newlines");

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(Error::Transport("transport closed".to_string()));
        }
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("failed to write frame: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Transport(format!("failed to write newline: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn read(&self) -> Result<Option<Inbound>> {
        if self.is_closed() {
            return Ok(None);
        }

        let mut reader = self.reader.lock().await;
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Transport(format!("failed to read frame: {}", e)))?;

            if bytes_read == 0 {
                return Ok(None);
            }

            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }

            return Ok(Some(codec::decode_line(trimmed)));
        }
    }

    async fn write(&self, response: &JsonRpcResponse) -> Result<()> {
        let line = codec::encode_response(response)?;
        self.write_line(&line).await
    }

    async fn write_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        let line = codec::encode_notification(notification)?;
        self.write_line(&line).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            // Already closed
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JsonRpcError;
    use crate::protocol::RequestId;
    use tokio::io::AsyncBufReadExt;

    #[tokio::test]
    async fn test_read_request_and_write_response() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = StdioTransport::new(server_read, server_write);

        let (client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        let inbound = transport.read().await.unwrap().unwrap();
        match inbound {
            Inbound::Request(req) => assert_eq!(req.method, "ping"),
            other => panic!("expected request, got {:?}", other),
        }

        transport
            .write(&JsonRpcResponse::result(
                RequestId::Number(1),
                serde_json::json!({}),
            ))
            .await
            .unwrap();

        let mut reader = BufReader::new(client_read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = StdioTransport::new(server_read, server_write);
        let (_client_read, mut client_write) = tokio::io::split(client);

        client_write
            .write_all(b"\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n")
            .await
            .unwrap();

        let inbound = transport.read().await.unwrap().unwrap();
        assert!(matches!(inbound, Inbound::Notification(_)));
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = StdioTransport::new(server_read, server_write);

        drop(client);
        assert!(transport.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_writes() {
        let (_client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = StdioTransport::new(server_read, server_write);

        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport
            .write(&JsonRpcResponse::error(
                None,
                JsonRpcError::internal_error("x"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
