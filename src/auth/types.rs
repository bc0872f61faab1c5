use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Authentication mechanism recorded in the credential file.
///
/// - `Social`: Kiro Desktop social login, refreshed via the desktop endpoint
/// - `Idc`: AWS Identity Center, refreshed via the OIDC token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Social,
    Idc,
}

impl AuthMethod {
    /// Tolerant parse: the files in the wild carry "social", "IdC", "idc".
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("idc") {
            AuthMethod::Idc
        } else {
            AuthMethod::Social
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Social => write!(f, "social"),
            AuthMethod::Idc => write!(f, "idc"),
        }
    }
}

/// Credential fields as stored in Kiro JSON files (camelCase).
///
/// All fields are optional so that partial sibling files ("client
/// credentials" supplements) deserialize cleanly.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FileCredentials {
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    #[serde(rename = "authMethod")]
    pub auth_method: Option<String>,
    #[serde(rename = "expiresAt")]
    pub expires_at: Option<String>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
    pub region: Option<String>,
}

/// Response from either refresh endpoint (camelCase).
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresIn")]
    pub expires_in: Option<i64>,
    #[serde(rename = "profileArn")]
    pub profile_arn: Option<String>,
}

/// Errors from the credential store.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No access token available after loading all credential sources")]
    MissingAccessToken,

    #[error("Refresh token is not set")]
    MissingRefreshToken,

    #[error("Client ID is not set (required for IdC refresh)")]
    MissingClientId,

    #[error("Client secret is not set (required for IdC refresh)")]
    MissingClientSecret,

    #[error("Token refresh failed: {status} - {body}")]
    RefreshFailed { status: u16, body: String },

    #[error("Refresh response did not contain accessToken")]
    RefreshMissingAccessToken,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 credential blob is invalid: {0}")]
    Base64(#[from] base64::DecodeError),
}
