//! Error types for tfo-mcp
//!
//! ## JSON-RPC Error Codes
//!
//! Standard JSON-RPC 2.0 error codes are defined in the specification:
//! <https://www.jsonrpc.org/specification#error_object>
//!
//! | Code   | Message          | Meaning                                  |
//! |--------|------------------|------------------------------------------|
//! | -32700 | Parse error      | Invalid JSON was received                |
//! | -32600 | Invalid Request  | The JSON sent is not a valid Request     |
//! | -32601 | Method not found | The method does not exist / is not available |
//! | -32602 | Invalid params   | Invalid method parameter(s)              |
//! | -32603 | Internal error   | Internal JSON-RPC error                  |
//!
//! ## MCP-Specific Error Codes
//!
//! The server error range (-32000 to -32099) carries protocol-specific
//! errors:
//!
//! | Code   | Name                | Meaning                               |
//! |--------|---------------------|---------------------------------------|
//! | -32001 | SessionNotFound     | Session not found or expired          |
//! | -32002 | ToolNotFound        | Tool not registered on the session    |
//! | -32003 | ResourceNotFound    | Resource not registered on the session|
//! | -32004 | PromptNotFound      | Prompt not registered on the session  |
//! | -32005 | InvalidSessionState | Method not legal in the current state |
//! | -32006 | Unauthorized        | Upstream rejected the credentials     |
//! | -32007 | RateLimited         | Upstream rate limit, retries exhausted|
//! | -32008 | Timeout             | Request exceeded its deadline         |
//! | -32009 | Cancelled           | Request cancelled by the client       |

use serde::{Deserialize, Serialize};

/// The closed set of error codes this server emits.
///
/// Spans the JSON-RPC 2.0 standard codes and the MCP-reserved server
/// error range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
    /// Session not found or expired
    SessionNotFound = -32001,
    /// Tool not registered on the session
    ToolNotFound = -32002,
    /// Resource not registered on the session
    ResourceNotFound = -32003,
    /// Prompt not registered on the session
    PromptNotFound = -32004,
    /// Method not legal in the current session state
    InvalidSessionState = -32005,
    /// Upstream rejected the credentials
    Unauthorized = -32006,
    /// Upstream rate limit, retries exhausted
    RateLimited = -32007,
    /// Request exceeded its deadline
    Timeout = -32008,
    /// Request cancelled by the client
    Cancelled = -32009,
}

impl ErrorCode {
    /// The numeric wire code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether this is a standard JSON-RPC 2.0 code.
    pub fn is_standard(self) -> bool {
        let c = self.code();
        (-32700..=-32600).contains(&c)
    }

    /// Whether this is an MCP-reserved server-range code.
    pub fn is_reserved(self) -> bool {
        let c = self.code();
        (-32099..=-32000).contains(&c)
    }

    /// The default human-readable message for the code.
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::SessionNotFound => "Session not found",
            ErrorCode::ToolNotFound => "Tool not found",
            ErrorCode::ResourceNotFound => "Resource not found",
            ErrorCode::PromptNotFound => "Prompt not found",
            ErrorCode::InvalidSessionState => "Invalid session state",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::RateLimited => "Rate limited",
            ErrorCode::Timeout => "Request timeout",
            ErrorCode::Cancelled => "Request cancelled",
        }
    }
}

/// JSON-RPC error object as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail to the error.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Method is not legal while the session is in its current state.
    pub fn invalid_session_state(method: &str, state: &str) -> Self {
        Self::new(
            ErrorCode::InvalidSessionState,
            format!("Method '{}' not allowed in session state {}", method, state),
        )
    }

    pub fn tool_not_found(name: &str) -> Self {
        Self::new(ErrorCode::ToolNotFound, format!("Tool not found: {}", name))
    }

    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("Resource not found: {}", uri),
        )
    }

    pub fn prompt_not_found(name: &str) -> Self {
        Self::new(
            ErrorCode::PromptNotFound,
            format!("Prompt not found: {}", name),
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }
}

/// tfo-mcp error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("JSON-RPC error: {0:?}")]
    JsonRpc(JsonRpcError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a tool error from any `Display` type.
    pub fn tool(message: impl std::fmt::Display) -> Self {
        Error::Tool(message.to_string())
    }

    /// Create a transport error from any `Display` type.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Error::Transport(message.to_string())
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

/// Result type alias for tfo-mcp
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_values() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::SessionNotFound.code(), -32001);
        assert_eq!(ErrorCode::ToolNotFound.code(), -32002);
        assert_eq!(ErrorCode::ResourceNotFound.code(), -32003);
        assert_eq!(ErrorCode::PromptNotFound.code(), -32004);
        assert_eq!(ErrorCode::InvalidSessionState.code(), -32005);
        assert_eq!(ErrorCode::Cancelled.code(), -32009);
    }

    #[test]
    fn test_standard_vs_reserved() {
        assert!(ErrorCode::ParseError.is_standard());
        assert!(!ErrorCode::ParseError.is_reserved());
        assert!(ErrorCode::RateLimited.is_reserved());
        assert!(!ErrorCode::RateLimited.is_standard());
    }

    #[test]
    fn test_error_serialization_omits_absent_data() {
        let err = JsonRpcError::method_not_found("nope");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], -32601);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_error_with_data() {
        let err = JsonRpcError::invalid_params("bad").with_data(serde_json::json!({"field": "x"}));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["data"]["field"], "x");
    }
}
