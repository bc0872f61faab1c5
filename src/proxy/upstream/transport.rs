// Upstream POST with the retry matrix:
//   401/403  → force credential refresh, retry once
//   429/5xx  → exponential backoff up to the retry cap
//   network  → same backoff when the failure is transient
//   other 4xx → surface immediately

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::config::get_machine_fingerprint;
use crate::auth::{AuthError, CredentialStore};
use crate::proxy::common::errors::AnthropicErrorType;
use crate::proxy::config::KiroConfig;
use crate::proxy::debug_logger;
use crate::proxy::errors::kiro_errors::classify_error_body;
use crate::proxy::errors::network_errors::is_retryable_network_error;
use crate::proxy::upstream::model_mapping::ModelInfo;

/// Agent strings the upstream fingerprints on.
const SDK_AGENT: &str = "aws-sdk-js/1.0.7";
const CLIENT_AGENT: &str = "KiroIDE-0.1.25";

#[derive(Error, Debug)]
pub enum KiroError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Upstream rate limited after {attempts} attempt(s): {body}")]
    RateLimited { attempts: u32, body: String },

    #[error("Upstream error {status}: {message}")]
    Upstream {
        status: u16,
        error_type: AnthropicErrorType,
        message: String,
    },

    #[error("Network failure after {attempts} attempt(s): {source}")]
    Network {
        attempts: u32,
        source: reqwest::Error,
    },
}

impl KiroError {
    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            KiroError::Auth(_) => StatusCode::SERVICE_UNAVAILABLE,
            KiroError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            KiroError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            KiroError::Network { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_type(&self) -> AnthropicErrorType {
        match self {
            KiroError::Auth(_) => AnthropicErrorType::AuthenticationError,
            KiroError::RateLimited { .. } => AnthropicErrorType::RateLimitError,
            KiroError::Upstream { error_type, .. } => *error_type,
            KiroError::Network { .. } => AnthropicErrorType::ApiError,
        }
    }
}

/// Client for upstream calls. The system proxy is opt-in.
pub fn build_http_client(cfg: &KiroConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(cfg.request_timeout);
    if !cfg.use_system_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}

fn build_headers(token: &str) -> HeaderMap {
    let fingerprint = get_machine_fingerprint();
    let agent = format!("{} {}-{}", SDK_AGENT, CLIENT_AGENT, fingerprint);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
        headers.insert("Authorization", value);
    }
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers.insert("Accept", HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()) {
        headers.insert("amz-sdk-invocation-id", value);
    }
    headers.insert("amz-sdk-request", HeaderValue::from_static("attempt=1; max=1"));
    headers.insert("x-amzn-kiro-agent-mode", HeaderValue::from_static("vibe"));
    if let Ok(value) = HeaderValue::from_str(&agent) {
        headers.insert("user-agent", value.clone());
        headers.insert("x-amz-user-agent", value);
    }
    headers
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.min(16))
}

/// POST the shaped payload and return the raw response buffer.
///
/// `get_token` refreshes first when expiry is near, so every send starts
/// with a token believed valid.
pub async fn send_request(
    client: &Client,
    store: &CredentialStore,
    cfg: &KiroConfig,
    model: &ModelInfo,
    payload: &Value,
    trace_id: &str,
) -> Result<Bytes, KiroError> {
    if cfg.debug_dump {
        debug_logger::dump_request(payload).await;
    }

    let url = if model.amazon_q {
        store.send_message_url().await
    } else {
        store.generate_url().await
    };

    let mut auth_retried = false;
    let mut attempt: u32 = 0;

    loop {
        let token = store.get_token().await?;

        let result = client
            .post(&url)
            .headers(build_headers(&token))
            .json(payload)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                if is_retryable_network_error(&e) && attempt < cfg.max_retries {
                    let delay = backoff_delay(cfg.base_delay, attempt);
                    warn!(
                        "[{}] Network error (attempt {}/{}): {}, retrying in {:?}",
                        trace_id,
                        attempt + 1,
                        cfg.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(KiroError::Network {
                    attempts: attempt + 1,
                    source: e,
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            return response.bytes().await.map_err(|e| KiroError::Network {
                attempts: attempt + 1,
                source: e,
            });
        }

        let code = status.as_u16();

        // Stale credentials: refresh and retry exactly once. The retry
        // cannot re-enter this branch.
        if (code == 401 || code == 403) && !auth_retried {
            auth_retried = true;
            let body = response.text().await.unwrap_or_default();
            warn!(
                "[{}] Upstream {} ({}), refreshing credentials and retrying once",
                trace_id, code, body
            );
            store.force_refresh().await?;
            continue;
        }

        if code == 429 || code >= 500 {
            let body = response.text().await.unwrap_or_default();
            if attempt < cfg.max_retries {
                let delay = backoff_delay(cfg.base_delay, attempt);
                warn!(
                    "[{}] Upstream {} (attempt {}/{}), backing off {:?}",
                    trace_id,
                    code,
                    attempt + 1,
                    cfg.max_retries,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            if code == 429 {
                return Err(KiroError::RateLimited {
                    attempts: attempt + 1,
                    body,
                });
            }
            let info = classify_error_body(code, &body);
            return Err(KiroError::Upstream {
                status: info.http_status,
                error_type: AnthropicErrorType::from_wire(info.error_type),
                message: info.user_message,
            });
        }

        // Remaining 4xx surface immediately.
        let body = response.text().await.unwrap_or_default();
        error!("[{}] Upstream error {}: {}", trace_id, code, body);
        let info = classify_error_body(code, &body);
        return Err(KiroError::Upstream {
            status: info.http_status,
            error_type: AnthropicErrorType::from_wire(info.error_type),
            message: info.user_message,
        });
    }
}
