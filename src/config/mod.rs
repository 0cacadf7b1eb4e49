use crate::ads::{client::DEFAULT_BASE_URL, AdsClientConfig};
use crate::oauth::provider::{ADWORDS_SCOPE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};
use crate::oauth::ProviderConfig;
use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Complete adsync configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub ads: AdsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "adsync.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// OAuth handshake configuration (client credentials come from the environment)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// How long a connect state stays redeemable (seconds)
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: i64,
    /// How often expired states are purged (seconds)
    #[serde(default = "default_state_purge_interval")]
    pub state_purge_interval_seconds: u64,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
}

fn default_state_ttl() -> i64 {
    crate::oauth::state_store::DEFAULT_STATE_TTL_SECS
}

fn default_state_purge_interval() -> u64 {
    300
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        ADWORDS_SCOPE.to_string(),
        "openid".to_string(),
        "email".to_string(),
    ]
}

fn default_redirect_url() -> String {
    "http://localhost:3000/integrations/google/callback".to_string()
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: default_state_ttl(),
            state_purge_interval_seconds: default_state_purge_interval(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            redirect_url: default_redirect_url(),
        }
    }
}

/// Ads API client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdsConfig {
    #[serde(default = "default_ads_base_url")]
    pub base_url: String,
    /// Per-attempt request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    /// Manager account id sent as `login-customer-id`
    #[serde(default)]
    pub login_customer_id: Option<String>,
}

fn default_ads_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for AdsConfig {
    fn default() -> Self {
        Self {
            base_url: default_ads_base_url(),
            request_timeout_seconds: default_request_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            login_customer_id: None,
        }
    }
}

/// Periodic cost sync for every linked account
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval")]
    pub interval_seconds: u64,
    /// Days before today to re-sync on each pass
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    6 * 60 * 60
}

/// Upper bound for `scheduler.lookback_days`.
pub const MAX_LOOKBACK_DAYS: u32 = 366;

fn default_lookback_days() -> u32 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_seconds: default_scheduler_interval(),
            lookback_days: default_lookback_days(),
        }
    }
}

/// Values that only ever come from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub encryption_key: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_developer_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("google_client_id", &self.google_client_id)
            .finish_non_exhaustive()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads secrets through `lookup`. The encryption key is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let encryption_key = get("ADSYNC_ENCRYPTION_KEY")
            .context("ADSYNC_ENCRYPTION_KEY is required (32-byte key, base64 or hex)")?;

        Ok(Self {
            encryption_key,
            google_client_id: get("ADSYNC_GOOGLE_CLIENT_ID").unwrap_or_default(),
            google_client_secret: get("ADSYNC_GOOGLE_CLIENT_SECRET").unwrap_or_default(),
            google_developer_token: get("ADSYNC_GOOGLE_DEVELOPER_TOKEN").unwrap_or_default(),
        })
    }
}

impl AppConfig {
    /// Applies `ADSYNC_*` overrides on top of file values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ADSYNC_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = get("ADSYNC_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("ADSYNC_GOOGLE_REDIRECT_URL") {
            self.oauth.redirect_url = v;
        }
        if let Some(v) = get("ADSYNC_GOOGLE_LOGIN_CUSTOMER_ID") {
            self.ads.login_customer_id = Some(v);
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.oauth.state_ttl_seconds <= 0 {
            bail!("oauth.state_ttl_seconds must be positive");
        }
        if self.oauth.state_purge_interval_seconds == 0 {
            bail!("oauth.state_purge_interval_seconds must be positive");
        }
        if self.scheduler.enabled && self.scheduler.interval_seconds == 0 {
            bail!("scheduler.interval_seconds must be positive");
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.scheduler.lookback_days) {
            bail!(
                "scheduler.lookback_days must be between 1 and {}",
                MAX_LOOKBACK_DAYS
            );
        }
        Ok(())
    }

    pub fn provider_config(&self, secrets: &Secrets) -> ProviderConfig {
        ProviderConfig {
            auth_url: self.oauth.auth_url.clone(),
            token_url: self.oauth.token_url.clone(),
            scopes: self.oauth.scopes.clone(),
            client_id: secrets.google_client_id.clone(),
            client_secret: secrets.google_client_secret.clone(),
            redirect_url: self.oauth.redirect_url.clone(),
        }
    }

    pub fn ads_client_config(&self, secrets: &Secrets) -> AdsClientConfig {
        AdsClientConfig {
            base_url: self.ads.base_url.clone(),
            developer_token: secrets.google_developer_token.clone(),
            login_customer_id: self.ads.login_customer_id.clone(),
        }
    }
}

/// Load configuration from an optional TOML file, then apply environment
/// overrides.
pub fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path))?
        }
        None => AppConfig::default(),
    };
    config.apply_overrides(|key| std::env::var(key).ok())?;
    Ok(config)
}
