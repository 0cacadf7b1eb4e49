//! User ↔ ad ownership edges.

use super::Database;
use anyhow::{Context, Result};
use rusqlite::params;
use std::sync::Arc;

/// Idempotent edge creation, shared with the cost-row transaction.
pub(super) const ENSURE_OWNERSHIP_SQL: &str = r#"
    INSERT INTO user_ads (user_id, ad_id)
    VALUES (?1, ?2)
    ON CONFLICT(user_id, ad_id) DO NOTHING
"#;

pub struct OwnershipRepo {
    db: Arc<Database>,
}

impl OwnershipRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub(crate) fn ensure(&self, user_id: i64, ad_id: i64) -> Result<()> {
        self.db
            .lock()?
            .execute(ENSURE_OWNERSHIP_SQL, params![user_id, ad_id])
            .context("Failed to ensure ad ownership")?;
        Ok(())
    }

    /// Every ad id owned by `user_id`, ascending.
    pub fn ids_by_user(&self, user_id: i64) -> Result<Vec<i64>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare("SELECT ad_id FROM user_ads WHERE user_id = ?1 ORDER BY ad_id")
            .context("Failed to prepare ownership query")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to query owned ads")?
            .collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read owned ad id")?;
        Ok(ids)
    }
}
