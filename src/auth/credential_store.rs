use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::{RegionalUrls, DEFAULT_NEAR_MINUTES, DEFAULT_REGION};
use super::types::{AuthError, AuthMethod, FileCredentials, RefreshResponse};

/// File name of the primary credential file inside the creds directory.
pub const PRIMARY_FILE_NAME: &str = "kiro-auth-token.json";

/// Credential source configuration.
///
/// Built from `KIRO_OAUTH_CREDS_DIR_PATH`, `KIRO_OAUTH_CREDS_FILE_PATH`,
/// `KIRO_OAUTH_CREDS_BASE64` and `CRON_NEAR_MINUTES`; tests construct it
/// directly.
#[derive(Debug, Clone)]
pub struct CredsConfig {
    pub dir_path: Option<PathBuf>,
    pub file_path: Option<PathBuf>,
    /// Consumed once during initialize, then dropped.
    pub base64_blob: Option<String>,
    pub near_minutes: i64,
}

impl Default for CredsConfig {
    fn default() -> Self {
        Self {
            dir_path: None,
            file_path: None,
            base64_blob: None,
            near_minutes: DEFAULT_NEAR_MINUTES,
        }
    }
}

impl CredsConfig {
    pub fn from_env() -> Self {
        // The blob is single-use: clear it so later re-initialization
        // cannot resurrect stale credentials from the environment.
        let base64_blob = std::env::var("KIRO_OAUTH_CREDS_BASE64").ok();
        if base64_blob.is_some() {
            std::env::remove_var("KIRO_OAUTH_CREDS_BASE64");
        }

        Self {
            dir_path: std::env::var("KIRO_OAUTH_CREDS_DIR_PATH")
                .ok()
                .map(PathBuf::from),
            file_path: std::env::var("KIRO_OAUTH_CREDS_FILE_PATH")
                .ok()
                .map(PathBuf::from),
            base64_blob,
            near_minutes: std::env::var("CRON_NEAR_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_NEAR_MINUTES),
        }
    }
}

struct Inner {
    access_token: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    auth_method: AuthMethod,
    expires_at: Option<DateTime<Utc>>,
    profile_arn: Option<String>,
    region: String,
    urls: RegionalUrls,
    primary_path: PathBuf,
    near_minutes: i64,
    http: Client,
}

/// Process-wide OAuth credential owner.
///
/// All mutable fields live behind one mutex, which also serializes
/// refreshes: overlapping callers coalesce on the lock, and whoever enters
/// second re-checks freshness before issuing another network call.
pub struct CredentialStore {
    inner: Mutex<Inner>,
}

impl CredentialStore {
    /// Merge all credential sources, derive regional URLs, and optionally
    /// refresh. Fails when no access token can be obtained.
    pub async fn initialize(mut cfg: CredsConfig, force_refresh: bool) -> Result<Self, AuthError> {
        let primary_path = cfg.file_path.clone().unwrap_or_else(|| {
            cfg.dir_path
                .clone()
                .unwrap_or_else(default_creds_dir)
                .join(PRIMARY_FILE_NAME)
        });

        let mut merged = FileCredentials::default();

        // Source 1: base64-encoded JSON blob from configuration.
        if let Some(blob) = cfg.base64_blob.take() {
            match decode_blob(&blob) {
                Ok(creds) => merge_into(&mut merged, creds, true),
                Err(e) => warn!("Ignoring invalid base64 credential blob: {}", e),
            }
        }

        // Source 2: the primary target file, loaded first.
        if let Some(creds) = load_credentials_file(&primary_path) {
            merge_into(&mut merged, creds, true);
        }

        // Source 3: sibling *.json files supplement client credentials.
        // expiresAt is never taken from these.
        if let Some(dir) = primary_path.parent() {
            for path in sibling_json_files(dir, &primary_path) {
                if let Some(creds) = load_credentials_file(&path) {
                    debug!("Merging sibling credential file {}", path.display());
                    merge_into(&mut merged, creds, false);
                }
            }
        }

        let region = merged.region.clone().unwrap_or_else(|| {
            warn!(
                "No region found in any credential source, assuming {}",
                DEFAULT_REGION
            );
            DEFAULT_REGION.to_string()
        });

        let auth_method = merged
            .auth_method
            .as_deref()
            .map(AuthMethod::parse)
            .unwrap_or_default();

        let expires_at = merged.expires_at.as_deref().and_then(|raw| {
            parse_expires_at(raw)
                .map_err(|e| warn!("Unparseable expiresAt {:?}: {}", raw, e))
                .ok()
        });

        let inner = Inner {
            access_token: merged.access_token.filter(|t| !t.is_empty()),
            refresh_token: merged.refresh_token.filter(|t| !t.is_empty()),
            client_id: merged.client_id,
            client_secret: merged.client_secret,
            auth_method,
            expires_at,
            profile_arn: merged.profile_arn,
            urls: RegionalUrls::for_region(&region),
            region,
            primary_path,
            near_minutes: cfg.near_minutes,
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        };

        let store = Self {
            inner: Mutex::new(inner),
        };

        {
            let mut inner = store.inner.lock().await;
            if force_refresh || (inner.access_token.is_none() && inner.refresh_token.is_some()) {
                inner.refresh().await?;
            }
            if inner.access_token.is_none() {
                return Err(AuthError::MissingAccessToken);
            }
            info!(
                "Credential store initialized: region={}, auth_method={}, expires_at={:?}",
                inner.region, inner.auth_method, inner.expires_at
            );
        }

        Ok(store)
    }

    /// Current access token, refreshing first when expiry is near.
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;
        if inner.is_expiry_near() {
            if let Err(e) = inner.refresh().await {
                // Keep serving the existing token while it is still nominally
                // valid; the 403 path will force another refresh if upstream
                // disagrees.
                if inner.access_token.is_some() {
                    warn!("Refresh failed, continuing with current token: {}", e);
                } else {
                    return Err(e);
                }
            }
        }
        inner
            .access_token
            .clone()
            .ok_or(AuthError::MissingAccessToken)
    }

    /// Unconditional refresh; returns the new access token.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        let mut inner = self.inner.lock().await;
        inner.refresh().await?;
        inner
            .access_token
            .clone()
            .ok_or(AuthError::MissingAccessToken)
    }

    /// True iff `now + CRON_NEAR_MINUTES >= expiresAt`. Unknown or
    /// unparseable expiry reads as "not near" so garbage never triggers a
    /// pre-emptive refresh.
    pub async fn is_expiry_near(&self) -> bool {
        self.inner.lock().await.is_expiry_near()
    }

    pub async fn region(&self) -> String {
        self.inner.lock().await.region.clone()
    }

    pub async fn profile_arn(&self) -> Option<String> {
        self.inner.lock().await.profile_arn.clone()
    }

    pub async fn auth_method(&self) -> AuthMethod {
        self.inner.lock().await.auth_method
    }

    pub async fn generate_url(&self) -> String {
        self.inner.lock().await.urls.generate.clone()
    }

    pub async fn send_message_url(&self) -> String {
        self.inner.lock().await.urls.send_message.clone()
    }

    #[cfg(test)]
    pub(crate) async fn test_override_urls(&self, urls: RegionalUrls) {
        self.inner.lock().await.urls = urls;
    }

    #[cfg(test)]
    pub(crate) async fn test_set_expires_at(&self, at: Option<DateTime<Utc>>) {
        self.inner.lock().await.expires_at = at;
    }

    #[cfg(test)]
    pub(crate) async fn test_access_token(&self) -> Option<String> {
        self.inner.lock().await.access_token.clone()
    }
}

impl Inner {
    fn is_expiry_near(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() + Duration::minutes(self.near_minutes) >= expires,
            None => false,
        }
    }

    async fn refresh(&mut self) -> Result<(), AuthError> {
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;

        let (url, payload) = match self.auth_method {
            AuthMethod::Social => (
                self.urls.refresh_social.clone(),
                json!({ "refreshToken": refresh_token }),
            ),
            AuthMethod::Idc => {
                let client_id = self.client_id.clone().ok_or(AuthError::MissingClientId)?;
                let client_secret = self
                    .client_secret
                    .clone()
                    .ok_or(AuthError::MissingClientSecret)?;
                (
                    self.urls.refresh_idc.clone(),
                    json!({
                        "refreshToken": refresh_token,
                        "clientId": client_id,
                        "clientSecret": client_secret,
                        "grantType": "refresh_token",
                    }),
                )
            }
        };

        info!("Refreshing Kiro credentials ({} endpoint)...", self.auth_method);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::RefreshFailed {
                status: status.as_u16(),
                body,
            });
        }

        let data: RefreshResponse = response.json().await?;
        let access = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::RefreshMissingAccessToken)?;

        self.access_token = Some(access);
        if let Some(rt) = data.refresh_token {
            self.refresh_token = Some(rt);
        }
        if let Some(arn) = data.profile_arn {
            self.profile_arn = Some(arn);
        }
        let expires_in = data.expires_in.unwrap_or(3600);
        self.expires_at = Some(Utc::now() + Duration::seconds(expires_in));

        info!(
            "Credentials refreshed, new expiry {}",
            self.expires_at.map(|d| d.to_rfc3339()).unwrap_or_default()
        );

        self.persist();
        Ok(())
    }

    /// Read-modify-write the primary file so keys written by other tools
    /// (or other credential records) survive the update. Missing file is
    /// treated as empty.
    fn persist(&self) {
        let path = &self.primary_path;

        let mut existing: Value = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));
        if !existing.is_object() {
            existing = Value::Object(Default::default());
        }

        if let Value::Object(map) = &mut existing {
            if let Some(ref token) = self.access_token {
                map.insert("accessToken".into(), Value::String(token.clone()));
            }
            if let Some(ref token) = self.refresh_token {
                map.insert("refreshToken".into(), Value::String(token.clone()));
            }
            if let Some(ref at) = self.expires_at {
                map.insert("expiresAt".into(), Value::String(at.to_rfc3339()));
            }
            if let Some(ref arn) = self.profile_arn {
                map.insert("profileArn".into(), Value::String(arn.clone()));
            }
        }

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match serde_json::to_string_pretty(&existing) {
            Ok(content) => match std::fs::write(path, content) {
                Ok(()) => debug!("Credentials persisted to {}", path.display()),
                Err(e) => warn!("Failed to persist credentials to {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to serialize credentials: {}", e),
        }
    }
}

fn default_creds_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aws")
        .join("sso")
        .join("cache")
}

fn decode_blob(blob: &str) -> Result<FileCredentials, AuthError> {
    let bytes = BASE64.decode(blob.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn load_credentials_file(path: &Path) -> Option<FileCredentials> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("Credential file {} not readable: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<FileCredentials>(&content) {
        Ok(creds) => Some(creds),
        Err(e) => {
            warn!("Skipping unparseable credential file {}: {}", path.display(), e);
            None
        }
    }
}

/// Every other `*.json` in the primary file's directory, sorted for
/// deterministic merge order.
fn sibling_json_files(dir: &Path, primary: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
                .filter(|p| p.as_path() != primary)
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Overwrite `dst` fields with `src`'s populated ones. `take_expiry`
/// controls whether `expiresAt` may be replaced (false for sibling files).
fn merge_into(dst: &mut FileCredentials, src: FileCredentials, take_expiry: bool) {
    if src.access_token.is_some() {
        dst.access_token = src.access_token;
    }
    if src.refresh_token.is_some() {
        dst.refresh_token = src.refresh_token;
    }
    if src.client_id.is_some() {
        dst.client_id = src.client_id;
    }
    if src.client_secret.is_some() {
        dst.client_secret = src.client_secret;
    }
    if src.auth_method.is_some() {
        dst.auth_method = src.auth_method;
    }
    if take_expiry && src.expires_at.is_some() {
        dst.expires_at = src.expires_at;
    }
    if src.profile_arn.is_some() {
        dst.profile_arn = src.profile_arn;
    }
    if src.region.is_some() {
        dst.region = src.region;
    }
}

fn parse_expires_at(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}
