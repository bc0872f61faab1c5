use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::info;

use crate::auth::{AuthError, CredentialStore, CredsConfig};
use crate::proxy::config::{KiroConfig, ServerConfig};
use crate::proxy::handlers;
use crate::proxy::upstream::model_mapping;
use crate::proxy::upstream::transport::build_http_client;

/// Shared per-process state.
///
/// The credential store is initialized lazily on first use so a
/// misconfigured deployment answers 5xx instead of refusing to boot;
/// failed attempts are retried on the next request.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<KiroConfig>,
    pub http: reqwest::Client,
    pub api_key: Option<String>,
    creds_cfg: Arc<CredsConfig>,
    store_cell: Arc<OnceCell<Arc<CredentialStore>>>,
}

impl AppState {
    pub fn new(cfg: KiroConfig, server_cfg: &ServerConfig, creds_cfg: CredsConfig) -> Self {
        let http = build_http_client(&cfg).unwrap_or_default();
        Self {
            cfg: Arc::new(cfg),
            http,
            api_key: server_cfg.api_key.clone(),
            creds_cfg: Arc::new(creds_cfg),
            store_cell: Arc::new(OnceCell::new()),
        }
    }

    pub async fn store(&self) -> Result<Arc<CredentialStore>, AuthError> {
        self.store_cell
            .get_or_try_init(|| async {
                CredentialStore::initialize((*self.creds_cfg).clone(), false)
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }
}

async fn handle_list_models(State(_state): State<AppState>) -> impl IntoResponse {
    let data: Vec<_> = model_mapping::list_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": "kiro-relay",
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handlers::claude::handle_messages))
        .route("/v1/models", get(handle_list_models))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_init_failure_is_retried_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        // No credential files at all: initialization must fail...
        let state = AppState::new(
            KiroConfig::default(),
            &ServerConfig {
                port: 0,
                api_key: None,
            },
            CredsConfig {
                dir_path: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
        );
        assert!(state.store().await.is_err());

        // ...but succeed once credentials appear, without a restart.
        std::fs::write(
            dir.path().join(crate::auth::credential_store::PRIMARY_FILE_NAME),
            r#"{"accessToken":"at","expiresAt":"2099-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(state.store().await.is_ok());
    }
}
