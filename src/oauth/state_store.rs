//! One-time OAuth state records for CSRF protection and PKCE binding.
//!
//! A state is consumed by a single conditional `DELETE ... RETURNING`, so of
//! any number of concurrent callbacks carrying the same state at most one
//! observes success.

use crate::store::{now_millis, Database};
use anyhow::Context;
use chrono::Duration;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default lifetime of a state record.
pub const DEFAULT_STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Error)]
pub enum StateError {
    /// Unknown, expired and already-consumed states are deliberately
    /// indistinguishable.
    #[error("invalid state")]
    InvalidOrExpired,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// What a successful consume hands back to the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedState {
    pub user_id: i64,
    pub code_verifier: String,
}

pub struct OAuthStateStore {
    db: Arc<Database>,
    ttl: Duration,
}

impl OAuthStateStore {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Upserts a state; it expires `ttl` after this call.
    pub fn save(&self, state: &str, code_verifier: &str, user_id: i64) -> Result<(), StateError> {
        let expires_at = now_millis() + self.ttl.num_milliseconds();

        self.db
            .lock()?
            .execute(
                r#"
                INSERT INTO oauth_states (state, code_verifier, user_id, expires_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(state) DO UPDATE SET
                    code_verifier = excluded.code_verifier,
                    user_id = excluded.user_id,
                    expires_at = excluded.expires_at
                "#,
                params![state, code_verifier, user_id, expires_at],
            )
            .context("Failed to save OAuth state")?;

        debug!(user_id = user_id, "OAuth state saved");
        Ok(())
    }

    /// Deletes and returns a live state.
    pub fn consume(&self, state: &str) -> Result<ConsumedState, StateError> {
        let consumed = self
            .db
            .lock()?
            .query_row(
                r#"
                DELETE FROM oauth_states
                WHERE state = ?1 AND expires_at > ?2
                RETURNING user_id, code_verifier
                "#,
                params![state, now_millis()],
                |row| {
                    Ok(ConsumedState {
                        user_id: row.get(0)?,
                        code_verifier: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to consume OAuth state")?;

        consumed.ok_or(StateError::InvalidOrExpired)
    }

    /// Removes expired states, returning how many were deleted.
    pub fn purge_expired(&self) -> Result<usize, StateError> {
        let purged = self
            .db
            .lock()?
            .execute(
                "DELETE FROM oauth_states WHERE expires_at <= ?1",
                params![now_millis()],
            )
            .context("Failed to purge expired OAuth states")?;
        Ok(purged)
    }

    /// Number of stored states, expired or not.
    #[cfg(test)]
    pub(crate) fn count(&self) -> Result<usize, StateError> {
        let count: i64 = self
            .db
            .lock()?
            .query_row("SELECT COUNT(*) FROM oauth_states", [], |row| row.get(0))
            .context("Failed to count OAuth states")?;
        Ok(count.max(0) as usize)
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(
    store: Arc<OAuthStateStore>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("OAuth state cleanup stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match store.purge_expired() {
            Ok(purged) => debug!(purged = purged, "OAuth state cleanup complete"),
            Err(e) => warn!(error = %e, "OAuth state cleanup failed"),
        }
    }
}
