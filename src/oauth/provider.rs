//! OAuth provider configuration.

use super::pkce::CHALLENGE_METHOD;
use serde::{Deserialize, Serialize};

/// Platform name of the Google Ads integration, used in paths and as the
/// `platform` column of linked accounts.
pub const GOOGLE: &str = "google";

/// Google's authorization and token endpoints.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scope requested for the ads API.
pub const ADWORDS_SCOPE: &str = "https://www.googleapis.com/auth/adwords";

/// OAuth provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OAuth authorization endpoint URL
    pub auth_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    pub scopes: Vec<String>,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,

    /// Where the provider sends the user back to
    pub redirect_url: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url)
            .finish_non_exhaustive()
    }
}

impl ProviderConfig {
    /// Space-separated scope string as sent to and stored from the provider.
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// Authorization URL requesting offline access with forced consent, so a
    /// refresh token is always granted.
    pub fn build_auth_url(&self, state: &str, code_challenge: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent&code_challenge={}&code_challenge_method={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode(&self.scope()),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
            CHALLENGE_METHOD,
        )
    }
}

/// Check if a provider name is served by this backend
pub fn is_supported_provider(name: &str) -> bool {
    name == GOOGLE
}
