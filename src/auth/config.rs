use std::sync::OnceLock;

/// Minutes before token expiration when a refresh is considered due.
/// Overridable via `CRON_NEAR_MINUTES`.
pub const DEFAULT_NEAR_MINUTES: i64 = 10;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Kiro Desktop (social) refresh endpoint template.
pub const REFRESH_SOCIAL_URL_TEMPLATE: &str =
    "https://prod.{{region}}.auth.desktop.kiro.dev/refreshToken";

/// AWS SSO OIDC (IdC) refresh endpoint template.
pub const REFRESH_IDC_URL_TEMPLATE: &str = "https://oidc.{{region}}.amazonaws.com/token";

/// Primary CodeWhisperer endpoint template.
pub const GENERATE_URL_TEMPLATE: &str =
    "https://codewhisperer.{{region}}.amazonaws.com/generateAssistantResponse";

/// Streaming endpoint template used for `amazonq`-prefixed models.
pub const SEND_MESSAGE_URL_TEMPLATE: &str =
    "https://codewhisperer.{{region}}.amazonaws.com/SendMessageStreaming";

/// Substitute `{{region}}` into a URL template.
pub fn resolve_url(template: &str, region: &str) -> String {
    template.replace("{{region}}", region)
}

/// The four regional endpoints this adapter talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionalUrls {
    pub refresh_social: String,
    pub refresh_idc: String,
    pub generate: String,
    pub send_message: String,
}

impl RegionalUrls {
    pub fn for_region(region: &str) -> Self {
        Self {
            refresh_social: resolve_url(REFRESH_SOCIAL_URL_TEMPLATE, region),
            refresh_idc: resolve_url(REFRESH_IDC_URL_TEMPLATE, region),
            generate: resolve_url(GENERATE_URL_TEMPLATE, region),
            send_message: resolve_url(SEND_MESSAGE_URL_TEMPLATE, region),
        }
    }
}

static MACHINE_FINGERPRINT: OnceLock<String> = OnceLock::new();

/// Machine fingerprint sent in the upstream user-agent headers.
///
/// SHA-256 of the first non-internal, non-zero MAC address formatted as
/// `aa:bb:cc:dd:ee:ff`. Computed once per process; falls back to hashing
/// the all-zero address when no usable interface exists.
pub fn get_machine_fingerprint() -> &'static str {
    MACHINE_FINGERPRINT.get_or_init(|| {
        use sha2::{Digest, Sha256};

        let mac = mac_address::get_mac_address()
            .ok()
            .flatten()
            .map(|m| m.bytes())
            .filter(|b| b.iter().any(|&x| x != 0))
            .unwrap_or([0u8; 6]);

        let formatted = mac
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");

        let mut hasher = Sha256::new();
        hasher.update(formatted.as_bytes());
        format!("{:x}", hasher.finalize())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url_substitutes_region() {
        assert_eq!(
            resolve_url(REFRESH_SOCIAL_URL_TEMPLATE, "us-east-1"),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(
            resolve_url(REFRESH_IDC_URL_TEMPLATE, "eu-central-1"),
            "https://oidc.eu-central-1.amazonaws.com/token"
        );
    }

    #[test]
    fn test_regional_urls_for_region() {
        let urls = RegionalUrls::for_region("ap-southeast-1");
        assert_eq!(
            urls.generate,
            "https://codewhisperer.ap-southeast-1.amazonaws.com/generateAssistantResponse"
        );
        assert_eq!(
            urls.send_message,
            "https://codewhisperer.ap-southeast-1.amazonaws.com/SendMessageStreaming"
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_hex() {
        let fp1 = get_machine_fingerprint();
        let fp2 = get_machine_fingerprint();
        assert_eq!(fp1, fp2);
        // SHA-256 hex is 64 chars
        assert_eq!(fp1.len(), 64);
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
