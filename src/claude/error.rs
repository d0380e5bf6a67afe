//! Upstream API error taxonomy
//!
//! An error is retryable iff it is rate-limited, overloaded, or a
//! generic server error. Authentication, permission, not-found,
//! invalid-request, and cancellation short-circuit the retry loop.

/// Classified upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Authentication,
    PermissionDenied,
    NotFound,
    InvalidRequest,
    RateLimited,
    Overloaded,
    Server,
    Timeout,
    Cancelled,
}

impl ApiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::Authentication => "authentication",
            ApiErrorKind::PermissionDenied => "permission_denied",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::InvalidRequest => "invalid_request",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::Overloaded => "overloaded",
            ApiErrorKind::Server => "server",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Cancelled => "cancelled",
        }
    }
}

/// An error from the Claude API or the machinery around it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("claude api error ({}): {message}", .kind.as_str())]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// HTTP status, when the failure came off the wire.
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Map an upstream error `type` string to a classified error.
    pub fn from_error_type(error_type: &str, message: impl Into<String>) -> Self {
        let kind = match error_type {
            "authentication_error" => ApiErrorKind::Authentication,
            "permission_error" => ApiErrorKind::PermissionDenied,
            "not_found_error" => ApiErrorKind::NotFound,
            "invalid_request_error" => ApiErrorKind::InvalidRequest,
            "rate_limit_error" => ApiErrorKind::RateLimited,
            "overloaded_error" => ApiErrorKind::Overloaded,
            "timeout_error" => ApiErrorKind::Timeout,
            _ => ApiErrorKind::Server,
        };
        Self::new(kind, message)
    }

    /// Classify by HTTP status when no error body was available.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::PermissionDenied,
            404 => ApiErrorKind::NotFound,
            400 | 413 | 422 => ApiErrorKind::InvalidRequest,
            429 => ApiErrorKind::RateLimited,
            529 => ApiErrorKind::Overloaded,
            408 => ApiErrorKind::Timeout,
            _ => ApiErrorKind::Server,
        };
        Self::new(kind, message).with_status(status)
    }

    pub fn cancelled() -> Self {
        Self::new(ApiErrorKind::Cancelled, "request cancelled")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidRequest, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Server, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::RateLimited, message)
    }

    /// The terminal error reported when the retry budget is spent. Keeps
    /// the kind of the last failure so callers map it to the right wire
    /// code.
    pub fn retries_exhausted(last: ApiError) -> Self {
        Self {
            kind: last.kind,
            message: format!("max retries exceeded: {}", last.message),
            status: last.status,
        }
    }

    /// Retryable: rate-limited, overloaded, or generic server error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::RateLimited | ApiErrorKind::Overloaded | ApiErrorKind::Server
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_set() {
        assert!(ApiError::rate_limited("slow down").is_retryable());
        assert!(ApiError::new(ApiErrorKind::Overloaded, "busy").is_retryable());
        assert!(ApiError::server("boom").is_retryable());

        assert!(!ApiError::new(ApiErrorKind::Authentication, "bad key").is_retryable());
        assert!(!ApiError::new(ApiErrorKind::NotFound, "404").is_retryable());
        assert!(!ApiError::invalid_request("bad").is_retryable());
        assert!(!ApiError::cancelled().is_retryable());
        assert!(!ApiError::timeout("deadline").is_retryable());
    }

    #[test]
    fn test_from_error_type() {
        assert_eq!(
            ApiError::from_error_type("rate_limit_error", "x").kind,
            ApiErrorKind::RateLimited
        );
        assert_eq!(
            ApiError::from_error_type("overloaded_error", "x").kind,
            ApiErrorKind::Overloaded
        );
        assert_eq!(
            ApiError::from_error_type("authentication_error", "x").kind,
            ApiErrorKind::Authentication
        );
        assert_eq!(
            ApiError::from_error_type("something_new", "x").kind,
            ApiErrorKind::Server
        );
    }

    #[test]
    fn test_from_status() {
        assert_eq!(ApiError::from_status(429, "x").kind, ApiErrorKind::RateLimited);
        assert_eq!(ApiError::from_status(529, "x").kind, ApiErrorKind::Overloaded);
        assert_eq!(ApiError::from_status(500, "x").kind, ApiErrorKind::Server);
        assert_eq!(
            ApiError::from_status(401, "x").kind,
            ApiErrorKind::Authentication
        );
        assert_eq!(ApiError::from_status(429, "x").status, Some(429));
    }

    #[test]
    fn test_retries_exhausted_keeps_kind() {
        let exhausted = ApiError::retries_exhausted(ApiError::rate_limited("later"));
        assert_eq!(exhausted.kind, ApiErrorKind::RateLimited);
        assert!(exhausted.message.contains("max retries exceeded"));
    }
}
