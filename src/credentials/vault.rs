//! Encrypted refresh-token custody.
//!
//! One entry per (user, external identity). Entries are never deleted: a new
//! consent supersedes the row in place and returns it to
//! [`CredentialStatus::Active`]; an authorization failure observed by the ads
//! client moves it to [`CredentialStatus::NeedsReauth`].

use super::encryption::{CryptoError, Encryptor};
use crate::store::{now_millis, Database};
use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Usable for deriving access tokens.
    Active,
    /// The provider rejected it; the user must consent again.
    NeedsReauth,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::NeedsReauth => "needs_reauth",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CredentialStatus::Active),
            "needs_reauth" => Some(CredentialStatus::NeedsReauth),
            _ => None,
        }
    }
}

/// A vault row as loaded for token derivation. The token stays encrypted
/// until [`TokenVault::reveal`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub external_identity: String,
    pub refresh_token_enc: String,
    pub scope: String,
}

#[derive(Debug, Error)]
pub enum VaultError {
    /// No usable entry (absent, or flagged as needing reauthorization).
    #[error("no active credential found")]
    NotFound,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Encrypted credential storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE credential_vault (
///     user_id           INTEGER NOT NULL,
///     external_identity TEXT NOT NULL,
///     refresh_token_enc TEXT NOT NULL,   -- v1: envelope
///     scope             TEXT NOT NULL,
///     status            TEXT NOT NULL,   -- active | needs_reauth
///     created_at        INTEGER NOT NULL,
///     updated_at        INTEGER NOT NULL,
///     UNIQUE(user_id, external_identity)
/// );
/// ```
pub struct TokenVault {
    db: Arc<Database>,
    encryptor: Encryptor,
}

impl TokenVault {
    pub fn new(db: Arc<Database>, encryptor: Encryptor) -> Self {
        Self { db, encryptor }
    }

    /// Encrypts and upserts a refresh token, returning the entry to
    /// [`CredentialStatus::Active`].
    pub fn save_refresh_token(
        &self,
        user_id: i64,
        external_identity: &str,
        refresh_token: &str,
        scope: &str,
    ) -> Result<(), VaultError> {
        let encrypted = self.encryptor.encrypt(refresh_token)?;
        let now = now_millis();

        self.db
            .lock()?
            .execute(
                r#"
                INSERT INTO credential_vault (
                    user_id, external_identity, refresh_token_enc, scope,
                    status, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(user_id, external_identity) DO UPDATE SET
                    refresh_token_enc = excluded.refresh_token_enc,
                    scope = excluded.scope,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                "#,
                params![
                    user_id,
                    external_identity,
                    encrypted,
                    scope,
                    CredentialStatus::Active.as_str(),
                    now,
                ],
            )
            .context("Failed to store refresh token")?;

        Ok(())
    }

    /// Loads the most recently updated active entry for a user.
    pub fn load_refresh_token(&self, user_id: i64) -> Result<StoredCredential, VaultError> {
        let conn = self.db.lock()?;
        let entry = conn
            .query_row(
                r#"
                SELECT external_identity, refresh_token_enc, scope
                FROM credential_vault
                WHERE user_id = ?1 AND status = ?2
                ORDER BY updated_at DESC, rowid DESC
                LIMIT 1
                "#,
                params![user_id, CredentialStatus::Active.as_str()],
                |row| {
                    Ok(StoredCredential {
                        external_identity: row.get(0)?,
                        refresh_token_enc: row.get(1)?,
                        scope: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to load refresh token")?;

        entry.ok_or(VaultError::NotFound)
    }

    /// Decrypts the refresh token of a loaded entry.
    pub fn reveal(&self, credential: &StoredCredential) -> Result<String, VaultError> {
        Ok(self.encryptor.decrypt(&credential.refresh_token_enc)?)
    }

    /// Moves an entry to [`CredentialStatus::NeedsReauth`].
    ///
    /// Only the ads client calls this, after the provider answered 401.
    /// Returns [`VaultError::NotFound`] when no row matches.
    pub fn mark_needs_reauth(&self, user_id: i64, external_identity: &str) -> Result<(), VaultError> {
        let updated = self
            .db
            .lock()?
            .execute(
                r#"
                UPDATE credential_vault
                SET status = ?3, updated_at = ?4
                WHERE user_id = ?1 AND external_identity = ?2
                "#,
                params![
                    user_id,
                    external_identity,
                    CredentialStatus::NeedsReauth.as_str(),
                    now_millis(),
                ],
            )
            .context("Failed to mark credential as needing reauthorization")?;

        if updated == 0 {
            return Err(VaultError::NotFound);
        }
        Ok(())
    }

    /// Current lifecycle state of an entry, if it exists.
    pub fn status(
        &self,
        user_id: i64,
        external_identity: &str,
    ) -> Result<Option<CredentialStatus>, VaultError> {
        let conn = self.db.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM credential_vault WHERE user_id = ?1 AND external_identity = ?2",
                params![user_id, external_identity],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read credential status")?;

        Ok(status.as_deref().and_then(CredentialStatus::parse))
    }
}
