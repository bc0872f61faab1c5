use std::time::Duration;

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// All adapter knobs, read once at startup.
#[derive(Debug, Clone)]
pub struct KiroConfig {
    /// KIRO_MAX_HISTORY — cap on retained messages.
    pub max_history: usize,
    /// KIRO_MAX_MESSAGE_LENGTH — per-message character cap.
    pub max_message_length: usize,
    /// KIRO_MAX_TOOLS — cap on tool definitions.
    pub max_tools: usize,
    /// KIRO_DISABLE_TOOLS — drop all tools.
    pub disable_tools: bool,
    /// KIRO_MAX_REQUEST_SIZE — total byte budget for the serialized payload.
    pub max_request_size: usize,
    /// KIRO_REQUEST_TIMEOUT (seconds) — total upstream request timeout.
    pub request_timeout: Duration,
    /// REQUEST_MAX_RETRIES — backoff retry attempts for 429/5xx/network.
    pub max_retries: u32,
    /// REQUEST_BASE_DELAY (ms) — base of the exponential backoff.
    pub base_delay: Duration,
    /// USE_SYSTEM_PROXY_KIRO — opt-in to the system proxy.
    pub use_system_proxy: bool,
    /// KIRO_DEBUG_DUMP — write request dumps under logs/.
    pub debug_dump: bool,
}

impl Default for KiroConfig {
    fn default() -> Self {
        Self {
            max_history: 15,
            max_message_length: 8000,
            max_tools: 12,
            disable_tools: false,
            max_request_size: 100_000,
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            use_system_proxy: false,
            debug_dump: false,
        }
    }
}

impl KiroConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_history: env_usize("KIRO_MAX_HISTORY", defaults.max_history),
            max_message_length: env_usize("KIRO_MAX_MESSAGE_LENGTH", defaults.max_message_length),
            max_tools: env_usize("KIRO_MAX_TOOLS", defaults.max_tools),
            disable_tools: env_bool("KIRO_DISABLE_TOOLS", defaults.disable_tools),
            max_request_size: env_usize("KIRO_MAX_REQUEST_SIZE", defaults.max_request_size),
            request_timeout: Duration::from_secs(env_u64("KIRO_REQUEST_TIMEOUT", 120)),
            max_retries: env_u64("REQUEST_MAX_RETRIES", 3) as u32,
            base_delay: Duration::from_millis(env_u64("REQUEST_BASE_DELAY", 1000)),
            use_system_proxy: env_bool("USE_SYSTEM_PROXY_KIRO", false),
            debug_dump: env_bool("KIRO_DEBUG_DUMP", false),
        }
    }
}

/// Inbound server knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PORT — listen port.
    pub port: u16,
    /// PROXY_API_KEY — shared-secret bearer for inbound requests; empty
    /// disables the check.
    pub api_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8045),
            api_key: std::env::var("PROXY_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        }
    }
}
