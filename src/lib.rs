//! # tfo-mcp
//!
//! A Model Context Protocol (MCP) server that mediates between
//! MCP-speaking clients and the Claude API, with a catalog of callable
//! tools, readable resources, and prompt templates.
//!
//! The crate is organized leaves-first:
//!
//! - [`codec`] - line-delimited JSON-RPC 2.0 framing
//! - [`values`] - self-validating identifiers, enumerations, bounds
//! - [`transport`] - stdio (and in-memory) message transports
//! - [`dispatcher`] - request demultiplexing, concurrency, cancellation
//! - [`session`] - the lifecycle aggregate owning all registries
//! - [`conversation`] - the multi-turn message log aggregate
//! - [`claude`] - the upstream client, retry policy, and tool loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tfo_mcp::{Dispatcher, DispatcherConfig, Session, StdioTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(StdioTransport::stdio());
//!     let dispatcher = Dispatcher::new(
//!         transport,
//!         Arc::new(Session::new()),
//!         DispatcherConfig::default(),
//!     );
//!     dispatcher.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod claude;
pub mod codec;
pub mod config;
pub mod content;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod prompt;
pub mod protocol;
pub mod repository;
pub mod resource;
pub mod session;
pub mod telemetry;
pub mod tool;
pub mod transport;
pub mod values;

// Re-exports
pub use claude::{ClaudeApi, ClaudeProxy, HttpClaudeClient, ProxyConfig};
pub use conversation::{Conversation, ConversationStatus};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Error, ErrorCode, JsonRpcError, Result};
pub use protocol::{CallToolResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use session::{ClientInfo, Session, SessionState};
pub use tool::{Tool, ToolBuilder, ToolHandler};
pub use transport::{StdioTransport, Transport};
