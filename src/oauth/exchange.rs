//! OAuth token exchange logic.
//!
//! Handles exchanging authorization codes (with their PKCE verifier) and
//! refresh tokens at the provider's token endpoint.

use super::provider::ProviderConfig;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed token response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("token exchange cancelled")]
    Cancelled,
}

/// OAuth token response (standard OAuth 2.0 plus OpenID `id_token`)
#[derive(Deserialize, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl TokenGrant {
    /// The `sub` claim of the id_token, or an empty string when the grant
    /// carries no decodable id_token.
    ///
    /// The payload is read without signature verification: the token arrived
    /// directly from the token endpoint.
    pub fn external_identity(&self) -> String {
        self.id_token
            .as_deref()
            .and_then(id_token_subject)
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: String,
}

fn id_token_subject(id_token: &str) -> Option<String> {
    let mut parts = id_token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&decoded).ok()?;
    (!claims.sub.is_empty()).then_some(claims.sub)
}

/// Client for the provider's token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Exchange an authorization code and its PKCE verifier for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant, ExchangeError> {
        let mut form_data = HashMap::new();
        form_data.insert("grant_type", "authorization_code");
        form_data.insert("code", code);
        form_data.insert("code_verifier", code_verifier);
        form_data.insert("redirect_uri", self.config.redirect_url.as_str());
        form_data.insert("client_id", self.config.client_id.as_str());
        form_data.insert("client_secret", self.config.client_secret.as_str());

        tracing::debug!(token_url = %self.config.token_url, "Exchanging authorization code");
        self.post_form(&form_data, cancel).await
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn exchange_refresh(
        &self,
        refresh_token: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant, ExchangeError> {
        let mut form_data = HashMap::new();
        form_data.insert("grant_type", "refresh_token");
        form_data.insert("refresh_token", refresh_token);
        form_data.insert("client_id", self.config.client_id.as_str());
        form_data.insert("client_secret", self.config.client_secret.as_str());

        self.post_form(&form_data, cancel).await
    }

    async fn post_form(
        &self,
        form_data: &HashMap<&str, &str>,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant, ExchangeError> {
        let request = async {
            let response = self
                .http
                .post(&self.config.token_url)
                .header("Accept", "application/json")
                .form(form_data)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(ExchangeError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let grant: TokenGrant = serde_json::from_str(&body)?;
            tracing::debug!(
                has_refresh_token = grant.refresh_token.is_some(),
                expires_in = ?grant.expires_in,
                "Token exchange successful"
            );
            Ok(grant)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExchangeError::Cancelled),
            result = request => result,
        }
    }
}
