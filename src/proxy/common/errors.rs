// Anthropic-compatible error envelope:
// {"type": "error", "error": {"type": "<type>", "message": "<msg>"}}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnthropicErrorType {
    InvalidRequestError,
    AuthenticationError,
    RateLimitError,
    ApiError,
    OverloadedError,
}

impl AnthropicErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequestError => "invalid_request_error",
            Self::AuthenticationError => "authentication_error",
            Self::RateLimitError => "rate_limit_error",
            Self::ApiError => "api_error",
            Self::OverloadedError => "overloaded_error",
        }
    }

    /// Reverse lookup for mapping tables that carry the wire string.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "invalid_request_error" => Self::InvalidRequestError,
            "authentication_error" => Self::AuthenticationError,
            "rate_limit_error" => Self::RateLimitError,
            "overloaded_error" => Self::OverloadedError,
            _ => Self::ApiError,
        }
    }
}

pub fn error_response(
    status: StatusCode,
    error_type: AnthropicErrorType,
    message: &str,
) -> Response {
    let body = json!({
        "type": "error",
        "error": {
            "type": error_type.as_str(),
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_round_trip() {
        for t in [
            AnthropicErrorType::InvalidRequestError,
            AnthropicErrorType::AuthenticationError,
            AnthropicErrorType::RateLimitError,
            AnthropicErrorType::ApiError,
            AnthropicErrorType::OverloadedError,
        ] {
            assert_eq!(AnthropicErrorType::from_wire(t.as_str()), t);
        }
        assert_eq!(
            AnthropicErrorType::from_wire("anything-else"),
            AnthropicErrorType::ApiError
        );
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let resp = error_response(
            StatusCode::BAD_REQUEST,
            AnthropicErrorType::InvalidRequestError,
            "bad body",
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["error"]["type"], "invalid_request_error");
        assert_eq!(parsed["error"]["message"], "bad body");
    }
}
