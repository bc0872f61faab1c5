// 模型名称映射 (public model name → CodeWhisperer model id)

/// Resolved model routing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Public name the client asked for (echoed back in responses).
    pub public_name: String,
    /// Upstream CodeWhisperer identifier for every `modelId` field.
    pub upstream_id: String,
    /// `amazonq`-prefixed names go to the SendMessageStreaming endpoint.
    pub amazon_q: bool,
}

/// Full mapping table.
const MODEL_TABLE: &[(&str, &str)] = &[
    ("claude-opus-4-5", "CLAUDE_OPUS_4_5_20251101_V1_0"),
    ("claude-opus-4-5-20251101", "CLAUDE_OPUS_4_5_20251101_V1_0"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-5-20250929", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4-20250514", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-haiku-4-5", "CLAUDE_HAIKU_4_5_20251001_V1_0"),
    ("claude-haiku-4-5-20251001", "CLAUDE_HAIKU_4_5_20251001_V1_0"),
    ("claude-3-7-sonnet-20250219", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("amazonq-claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("amazonq-claude-opus-4-5", "CLAUDE_OPUS_4_5_20251101_V1_0"),
];

/// Names this provider actually serves; table entries outside the
/// allowlist are invisible to lookup and listing.
const MODEL_ALLOWLIST: &[&str] = &[
    "claude-opus-4-5",
    "claude-opus-4-5-20251101",
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-20250929",
    "claude-sonnet-4-20250514",
    "claude-haiku-4-5",
    "claude-haiku-4-5-20251001",
    "claude-3-7-sonnet-20250219",
    "amazonq-claude-sonnet-4-5",
    "amazonq-claude-opus-4-5",
];

/// Fallback when the public name is unknown.
pub const DEFAULT_PUBLIC_MODEL: &str = "claude-opus-4-5";

fn lookup(name: &str) -> Option<&'static str> {
    if !MODEL_ALLOWLIST.contains(&name) {
        return None;
    }
    MODEL_TABLE
        .iter()
        .find(|(public, _)| *public == name)
        .map(|(_, upstream)| *upstream)
}

/// Resolve a public model name, falling back to the configured default on
/// a lookup miss.
pub fn resolve_model(name: &str) -> ModelInfo {
    match lookup(name) {
        Some(upstream) => ModelInfo {
            public_name: name.to_string(),
            upstream_id: upstream.to_string(),
            amazon_q: name.starts_with("amazonq"),
        },
        None => {
            let upstream =
                lookup(DEFAULT_PUBLIC_MODEL).expect("default model must be in the table");
            tracing::debug!("Unknown model {:?}, falling back to {}", name, DEFAULT_PUBLIC_MODEL);
            ModelInfo {
                public_name: name.to_string(),
                upstream_id: upstream.to_string(),
                amazon_q: name.starts_with("amazonq"),
            }
        }
    }
}

/// Allowlisted public names, sorted, for the /v1/models listing.
pub fn list_models() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = MODEL_TABLE
        .iter()
        .map(|(public, _)| *public)
        .filter(|public| MODEL_ALLOWLIST.contains(public))
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}
