//! Access-token derivation from stored refresh tokens.

use crate::credentials::{TokenVault, VaultError};
use crate::oauth::{ExchangeError, OAuthClient};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("refresh token exchange failed: {0}")]
    Exchange(#[from] ExchangeError),
}

impl TokenError {
    /// True when the user has no usable credential and must (re)connect.
    pub fn is_missing_credential(&self) -> bool {
        matches!(self, TokenError::Vault(VaultError::NotFound))
    }
}

/// A short-lived access token and the identity that granted it.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub external_identity: String,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("external_identity", &self.external_identity)
            .finish_non_exhaustive()
    }
}

/// Source of access tokens for the ads client.
///
/// # Lifecycle
/// 1. `access_token()` is called once per client operation
/// 2. If the ads API answers 401, the client calls `mark_needs_reauth()`
///    with the identity that came back in step 1, exactly once
/// 3. Later `access_token()` calls fail until the user consents again
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError>;

    /// Moves the credential to NeedsReauth. `VaultError::NotFound` is
    /// non-fatal to callers.
    fn mark_needs_reauth(&self, user_id: i64, external_identity: &str) -> Result<(), VaultError>;
}

/// Vault-backed token source: load, decrypt, exchange. No retries here;
/// failures propagate unchanged.
pub struct TokenSource {
    vault: Arc<TokenVault>,
    oauth: OAuthClient,
}

impl TokenSource {
    pub fn new(vault: Arc<TokenVault>, oauth: OAuthClient) -> Self {
        Self { vault, oauth }
    }
}

#[async_trait]
impl AccessTokenProvider for TokenSource {
    async fn access_token(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        let entry = self.vault.load_refresh_token(user_id)?;
        let refresh_token = self.vault.reveal(&entry)?;
        let grant = self.oauth.exchange_refresh(&refresh_token, cancel).await?;

        tracing::debug!(
            user_id = user_id,
            external_identity = %entry.external_identity,
            "Derived access token"
        );

        Ok(AccessToken {
            token: grant.access_token,
            external_identity: entry.external_identity,
        })
    }

    fn mark_needs_reauth(&self, user_id: i64, external_identity: &str) -> Result<(), VaultError> {
        self.vault.mark_needs_reauth(user_id, external_identity)
    }
}
