// Anthropic 协议处理器 (thin ingress over the Kiro adapter)

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::proxy::common::errors::{error_response, AnthropicErrorType};
use crate::proxy::mappers::claude::models::ClaudeRequest;
use crate::proxy::server::AppState;
use crate::proxy::upstream::{
    model_mapping, parsers, request_builder, response_builder, transport,
};

fn new_trace_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

/// Shared-secret bearer check. Belongs to the router layer, not the
/// adapter; empty configuration disables it.
fn check_api_key(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_key else {
        return true;
    };
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let x_api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    bearer == Some(expected.as_str()) || x_api_key == Some(expected.as_str())
}

pub async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !check_api_key(&state, &headers) {
        return error_response(
            StatusCode::UNAUTHORIZED,
            AnthropicErrorType::AuthenticationError,
            "Invalid or missing API key",
        );
    }

    let trace_id = new_trace_id();

    let request: ClaudeRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                AnthropicErrorType::InvalidRequestError,
                &format!("Invalid request body: {}", e),
            );
        }
    };

    info!(
        "[{}] /v1/messages | model={} stream={} messages={} tools={}",
        trace_id,
        request.model,
        request.stream,
        request.messages.len(),
        request.tools.as_ref().map(|t| t.len()).unwrap_or(0),
    );

    let store = match state.store().await {
        Ok(s) => s,
        Err(e) => {
            warn!("[{}] Credential initialization failed: {}", trace_id, e);
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                AnthropicErrorType::ApiError,
                &format!("Credential initialization failed: {}", e),
            );
        }
    };

    let model = model_mapping::resolve_model(&request.model);
    let profile_arn = store.profile_arn().await;
    let auth_method = store.auth_method().await;

    let payload = request_builder::build_codewhisperer_payload(
        &request,
        &state.cfg,
        &model,
        profile_arn.as_deref(),
        auth_method,
    );

    let buffer = match transport::send_request(
        &state.http,
        &store,
        &state.cfg,
        &model,
        &payload,
        &trace_id,
    )
    .await
    {
        Ok(b) => b,
        Err(e) => {
            warn!("[{}] Upstream request failed: {}", trace_id, e);
            return error_response(e.http_status(), e.error_type(), &e.to_string());
        }
    };

    let parsed = parsers::parse_response_buffer(&buffer);
    info!(
        "[{}] Parsed upstream response: {} chars, {} tool call(s)",
        trace_id,
        parsed.response_text.len(),
        parsed.tool_calls.len(),
    );

    if request.stream {
        // All data is already in memory; the event sequence is fixed, so
        // it is yielded straight into the SSE sink.
        let events = response_builder::build_stream_events(&parsed, &request.model);
        let sse = async_stream::stream! {
            for event in events {
                yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(event.to_sse()));
            }
            yield Ok(Bytes::from("data: [DONE]\n\n"));
        };

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(Body::from_stream(sse))
            .unwrap()
    } else {
        Json(response_builder::build_message(&parsed, &request.model)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_shape() {
        let id = new_trace_id();
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
