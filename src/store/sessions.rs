//! Opaque bearer sessions.

use super::{now_millis, Database};
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use uuid::Uuid;

/// Maps bearer tokens to user ids.
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issues a new random token for `user_id`.
    pub fn issue(&self, user_id: i64) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.db
            .lock()?
            .execute(
                "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, now_millis()],
            )
            .context("Failed to issue session")?;
        Ok(token)
    }

    pub fn resolve(&self, token: &str) -> Result<Option<i64>> {
        self.db
            .lock()?
            .query_row(
                "SELECT user_id FROM sessions WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to resolve session")
    }
}
