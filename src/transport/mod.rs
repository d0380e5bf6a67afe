//! MCP transport implementations
//!
//! A transport moves framed JSON-RPC messages between the server and one
//! client. Contract:
//!
//! - `read` is called only by the dispatcher (single reader).
//! - Writes are serialized across concurrent callers (single-writer
//!   discipline per transport instance).
//! - `close` is idempotent; writes after close fail with a
//!   closed-transport error.
//!
//! The stdio variant is generic over its reader and writer, so tests can
//! drive a server over `tokio::io::duplex` pipes instead of real stdio.

pub mod stdio;

use async_trait::async_trait;

use crate::codec::Inbound;
use crate::error::Result;
use crate::protocol::{JsonRpcNotification, JsonRpcResponse};

pub use stdio::StdioTransport;

/// Bidirectional message transport for one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next inbound frame. `None` means the peer closed the
    /// connection (EOF).
    async fn read(&self) -> Result<Option<Inbound>>;

    /// Write a response frame.
    async fn write(&self, response: &JsonRpcResponse) -> Result<()>;

    /// Write a server-origin notification frame.
    async fn write_notification(&self, notification: &JsonRpcNotification) -> Result<()>;

    /// Close the transport. Idempotent.
    async fn close(&self) -> Result<()>;
}
