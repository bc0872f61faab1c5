mod auth;
mod logger;
mod proxy;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    logger::init();

    let kiro_cfg = proxy::config::KiroConfig::from_env();
    let server_cfg = proxy::config::ServerConfig::from_env();
    let creds_cfg = auth::CredsConfig::from_env();

    info!("Starting kiro-relay on port {}", server_cfg.port);
    if server_cfg.api_key.is_none() {
        warn!("PROXY_API_KEY is not set; inbound requests are unauthenticated");
    }

    let state = proxy::server::AppState::new(kiro_cfg, &server_cfg, creds_cfg);

    // Warm the credential store so misconfiguration shows up in the
    // startup log; requests retry initialization if this fails.
    match state.store().await {
        Ok(store) => {
            let region = store.region().await;
            let auth_method = store.auth_method().await;
            info!(
                "Credential store ready (region={}, auth_method={})",
                region, auth_method
            );
        }
        Err(e) => warn!("Credential store not ready: {} (will retry per request)", e),
    }

    if let Err(e) = proxy::server::serve(state, server_cfg.port).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
