//! Best-effort request dumps for debugging payload-shaping issues.
//!
//! Dumps land in `logs/kiro_request_<epochMs>.json`. Every failure is a
//! warning, never an error: dumping must not interfere with the request.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

const DUMP_DIR: &str = "logs";

pub async fn dump_request(payload: &Value) {
    dump_request_to(Path::new(DUMP_DIR), payload).await;
}

pub async fn dump_request_to(dir: &Path, payload: &Value) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Cannot create dump directory {}: {}", dir.display(), e);
        return;
    }

    let path = dir.join(format!(
        "kiro_request_{}.json",
        chrono::Utc::now().timestamp_millis()
    ));

    let content = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| payload.to_string());

    match tokio::fs::write(&path, content).await {
        Ok(()) => debug!("Request dumped to {}", path.display()),
        Err(e) => warn!("Failed to write request dump {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dump_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        dump_request_to(dir.path(), &json!({"conversationState": {"chatTriggerType": "MANUAL"}}))
            .await;

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().into_string().unwrap();
        assert!(name.starts_with("kiro_request_"));
        assert!(name.ends_with(".json"));

        let content = std::fs::read_to_string(entries[0].path()).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["conversationState"]["chatTriggerType"], "MANUAL");
    }

    #[tokio::test]
    async fn test_dump_to_unwritable_dir_is_non_fatal() {
        // Must not panic.
        dump_request_to(Path::new("/proc/definitely/not/writable"), &json!({})).await;
    }
}
