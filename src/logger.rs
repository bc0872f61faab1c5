use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` controls the filter; default is `info` for the crate and
/// `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,kiro_relay=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
