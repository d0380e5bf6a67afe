//! Wire codec: line-delimited JSON-RPC framing
//!
//! One JSON value per line, UTF-8, trailing newline. Decoding classifies
//! each line into a request, a notification, or a structured parse-error
//! marker; the dispatcher answers the marker with code -32700 and a null
//! id. Identifier values are preserved exactly as received.

use serde_json::Value;

use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A well-formed request (has an id).
    Request(JsonRpcRequest),
    /// A well-formed notification (no id).
    Notification(JsonRpcNotification),
    /// A frame that could not be decoded. The dispatcher responds with
    /// the carried error, using whatever id was recoverable.
    Malformed {
        id: Option<RequestId>,
        error: JsonRpcError,
    },
}

/// Decode a single line into an inbound frame.
///
/// Presence of the `id` key is what distinguishes a request from a
/// notification; its value kind (string vs integer) is preserved.
pub fn decode_line(line: &str) -> Inbound {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Inbound::Malformed {
                id: None,
                error: JsonRpcError::parse_error(format!("invalid JSON: {}", e)),
            };
        }
    };

    let Some(obj) = value.as_object() else {
        return Inbound::Malformed {
            id: None,
            error: JsonRpcError::invalid_request("message must be a JSON object"),
        };
    };

    let id = obj
        .get("id")
        .and_then(|v| serde_json::from_value::<RequestId>(v.clone()).ok());

    if obj.contains_key("id") {
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(req) => match req.validate() {
                Ok(()) => Inbound::Request(req),
                Err(error) => Inbound::Malformed { id, error },
            },
            Err(e) => Inbound::Malformed {
                id,
                error: JsonRpcError::invalid_request(format!("malformed request: {}", e)),
            },
        }
    } else {
        match serde_json::from_value::<JsonRpcNotification>(value) {
            Ok(notification) => Inbound::Notification(notification),
            Err(e) => Inbound::Malformed {
                id: None,
                error: JsonRpcError::invalid_request(format!("malformed notification: {}", e)),
            },
        }
    }
}

/// Encode a response as a single line (without the trailing newline).
pub fn encode_response(response: &JsonRpcResponse) -> Result<String> {
    let line = serde_json::to_string(response)?;
    debug_assert!(!line.contains('\n'), "frame must not contain newlines");
    Ok(line)
}

/// Encode a notification as a single line (without the trailing newline).
pub fn encode_notification(notification: &JsonRpcNotification) -> Result<String> {
    let line = serde_json::to_string(notification)?;
    debug_assert!(!line.contains('\n'), "frame must not contain newlines");
    Ok(line)
}

/// Encode any serializable frame, refusing embedded newlines.
pub fn encode_value<T: serde::Serialize>(value: &T) -> Result<String> {
    let line = serde_json::to_string(value)?;
    if line.contains('\n') {
        return Err(Error::Transport(
            "frame contains embedded newline".to_string(),
        ));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let inbound = decode_line(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        match inbound {
            Inbound::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.method, "ping");
                assert!(req.params.is_none());
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_string_id_preserved() {
        let inbound = decode_line(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#);
        match inbound {
            Inbound::Request(req) => assert_eq!(req.id, RequestId::String("abc".to_string())),
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let inbound = decode_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        match inbound {
            Inbound::Notification(n) => assert_eq!(n.method, "notifications/initialized"),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_invalid_json() {
        let inbound = decode_line("{ not json");
        match inbound {
            Inbound::Malformed { id, error } => {
                assert!(id.is_none());
                assert_eq!(error.code, ErrorCode::ParseError.code());
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_object() {
        let inbound = decode_line("[1,2,3]");
        match inbound {
            Inbound::Malformed { error, .. } => {
                assert_eq!(error.code, ErrorCode::InvalidRequest.code());
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_wrong_version_keeps_id() {
        let inbound = decode_line(r#"{"jsonrpc":"1.0","id":5,"method":"ping"}"#);
        match inbound {
            Inbound::Malformed { id, error } => {
                assert_eq!(id, Some(RequestId::Number(5)));
                assert_eq!(error.code, ErrorCode::InvalidRequest.code());
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_request_equality() {
        let original = JsonRpcRequest::new(42, "tools/list").with_params(json!({}));
        let line = serde_json::to_string(&original).unwrap();
        match decode_line(&line) {
            Inbound::Request(back) => {
                assert_eq!(back.id, original.id);
                assert_eq!(back.method, original.method);
                assert_eq!(back.params, original.params);
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_response_single_line() {
        let resp = JsonRpcResponse::result(RequestId::Number(1), json!({"text": "a\nb"}));
        let line = encode_response(&resp).unwrap();
        assert!(!line.contains('\n'));
    }
}
