//! Mapping of CodeWhisperer error bodies to client-facing errors.
//!
//! Non-retryable upstream responses often carry a JSON body with a
//! `reason` / `reasonCode` field; known codes get a friendly message and
//! a sensible HTTP status instead of the raw upstream dump.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamErrorReason {
    ContentLengthExceedsThreshold,
    MonthlyRequestCount,
    MonthlyTokenCount,
    DailyRequestCount,
    ConcurrentRequestLimit,
    ModelNotAvailable,
    ServiceUnavailable,
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamErrorInfo {
    pub reason: UpstreamErrorReason,
    pub error_type: &'static str,
    pub http_status: u16,
    pub user_message: String,
}

pub fn map_reason_code(reason_code: &str, raw_message: &str, original_status: u16) -> UpstreamErrorInfo {
    match reason_code {
        "CONTENT_LENGTH_EXCEEDS_THRESHOLD" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::ContentLengthExceedsThreshold,
            error_type: "invalid_request_error",
            http_status: 400,
            user_message: "Conversation size exceeds the model context limit.".into(),
        },
        "MONTHLY_REQUEST_COUNT" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::MonthlyRequestCount,
            error_type: "rate_limit_error",
            http_status: 429,
            user_message: "Monthly request quota exhausted for this account.".into(),
        },
        "MONTHLY_TOKEN_COUNT" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::MonthlyTokenCount,
            error_type: "rate_limit_error",
            http_status: 429,
            user_message: "Monthly token quota exhausted for this account.".into(),
        },
        "DAILY_REQUEST_COUNT" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::DailyRequestCount,
            error_type: "rate_limit_error",
            http_status: 429,
            user_message: "Daily request quota exhausted, try again tomorrow.".into(),
        },
        "CONCURRENT_REQUEST_LIMIT" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::ConcurrentRequestLimit,
            error_type: "rate_limit_error",
            http_status: 429,
            user_message: "Too many concurrent requests upstream.".into(),
        },
        "MODEL_NOT_AVAILABLE" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::ModelNotAvailable,
            error_type: "invalid_request_error",
            http_status: 400,
            user_message: "The requested model is not available on this account.".into(),
        },
        "SERVICE_UNAVAILABLE" => UpstreamErrorInfo {
            reason: UpstreamErrorReason::ServiceUnavailable,
            error_type: "api_error",
            http_status: 503,
            user_message: "The upstream service is temporarily unavailable.".into(),
        },
        _ => UpstreamErrorInfo {
            reason: UpstreamErrorReason::Unknown(reason_code.to_string()),
            error_type: "api_error",
            http_status: original_status,
            user_message: if reason_code.is_empty() {
                raw_message.to_string()
            } else {
                format!("{} (reason: {})", raw_message, reason_code)
            },
        },
    }
}

/// Pull `reason`/`reasonCode` and `message` out of an upstream error body
/// and map them. Non-JSON bodies become an Unknown with the raw text.
pub fn classify_error_body(status: u16, body: &str) -> UpstreamErrorInfo {
    match serde_json::from_str::<Value>(body) {
        Ok(parsed) => {
            let reason = parsed
                .get("reason")
                .or_else(|| parsed.get("reasonCode"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let message = parsed
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or(body);
            map_reason_code(reason, message, status)
        }
        Err(_) => map_reason_code("", body, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_length_maps_to_invalid_request() {
        let info = map_reason_code("CONTENT_LENGTH_EXCEEDS_THRESHOLD", "too long", 400);
        assert_eq!(info.reason, UpstreamErrorReason::ContentLengthExceedsThreshold);
        assert_eq!(info.error_type, "invalid_request_error");
        assert_eq!(info.http_status, 400);
    }

    #[test]
    fn test_quota_codes_map_to_rate_limit() {
        for code in [
            "MONTHLY_REQUEST_COUNT",
            "MONTHLY_TOKEN_COUNT",
            "DAILY_REQUEST_COUNT",
            "CONCURRENT_REQUEST_LIMIT",
        ] {
            let info = map_reason_code(code, "quota", 400);
            assert_eq!(info.error_type, "rate_limit_error", "code: {}", code);
            assert_eq!(info.http_status, 429);
        }
    }

    #[test]
    fn test_unknown_code_preserves_status_and_message() {
        let info = map_reason_code("SOMETHING_NEW", "odd failure", 418);
        assert_eq!(info.reason, UpstreamErrorReason::Unknown("SOMETHING_NEW".into()));
        assert_eq!(info.http_status, 418);
        assert!(info.user_message.contains("odd failure"));
        assert!(info.user_message.contains("SOMETHING_NEW"));
    }

    #[test]
    fn test_classify_json_body() {
        let body = r#"{"reason":"MODEL_NOT_AVAILABLE","message":"no such model"}"#;
        let info = classify_error_body(400, body);
        assert_eq!(info.reason, UpstreamErrorReason::ModelNotAvailable);
    }

    #[test]
    fn test_classify_reason_code_variant() {
        let body = r#"{"reasonCode":"SERVICE_UNAVAILABLE","message":"down"}"#;
        let info = classify_error_body(503, body);
        assert_eq!(info.reason, UpstreamErrorReason::ServiceUnavailable);
        assert_eq!(info.http_status, 503);
    }

    #[test]
    fn test_classify_non_json_body() {
        let info = classify_error_body(400, "plain text failure");
        assert_eq!(info.reason, UpstreamErrorReason::Unknown(String::new()));
        assert_eq!(info.http_status, 400);
        assert_eq!(info.user_message, "plain text failure");
    }
}
