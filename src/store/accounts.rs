//! Linked ad accounts, lazily created ads, and spend upserts.

use super::ownership::ENSURE_OWNERSHIP_SQL;
use super::{now_millis, Database};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Status written for every account bound through the link flow.
pub const STATUS_LINKED: &str = "linked";

/// Strips the presentation dashes from an external account id
/// (`123-456-7890` -> `1234567890`).
pub fn normalize_account_id(external_id: &str) -> String {
    external_id.chars().filter(|c| *c != '-').collect()
}

/// An external account bound to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedAccount {
    pub account_id: i64,
    pub user_id: i64,
    pub platform: String,
    pub external_account_id: String,
    pub token_owner: String,
    pub status: String,
}

/// One ad's spend for one calendar day, in micro-currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendRecord {
    pub ad_id: i64,
    pub date: NaiveDate,
    pub cost_micros: i64,
}

impl SpendRecord {
    /// Spend in currency units (`5_000_000` micros -> `5`).
    pub fn spend(&self) -> Decimal {
        Decimal::new(self.cost_micros, 6).normalize()
    }
}

/// The sub-step of a cost-row write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStage {
    Validate,
    Transaction,
    EnsureAd,
    EnsureOwnership,
    UpsertInsight,
    UpsertDailyMetric,
}

impl fmt::Display for RowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowStage::Validate => "validate",
            RowStage::Transaction => "transaction",
            RowStage::EnsureAd => "ensure_ad",
            RowStage::EnsureOwnership => "ensure_ownership",
            RowStage::UpsertInsight => "upsert_insight",
            RowStage::UpsertDailyMetric => "upsert_daily_metric",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct RowWriteError {
    pub stage: RowStage,
    #[source]
    pub source: Box<dyn StdError + Send + Sync>,
}

impl RowWriteError {
    pub fn new(stage: RowStage, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

pub struct AccountsRepo {
    db: Arc<Database>,
}

impl AccountsRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Binds external accounts to `user_id` in one transaction.
    ///
    /// An account already bound to another user is rebound to this one
    /// (last writer wins); the reassignment is logged and the previous
    /// user loses ownership of that account's ads.
    pub fn link_accounts(
        &self,
        user_id: i64,
        platform: &str,
        token_owner: &str,
        external_ids: &[String],
    ) -> Result<usize> {
        if external_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.lock()?;
        let tx = conn
            .transaction()
            .context("Failed to begin link transaction")?;
        let now = now_millis();

        for raw_id in external_ids {
            let external_id = normalize_account_id(raw_id);

            let previous_owner: Option<i64> = tx
                .query_row(
                    "SELECT user_id FROM ad_accounts WHERE platform = ?1 AND external_account_id = ?2",
                    params![platform, external_id],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to read current account owner")?;

            if let Some(previous) = previous_owner.filter(|previous| *previous != user_id) {
                warn!(
                    platform = %platform,
                    external_account_id = %external_id,
                    previous_user_id = previous,
                    user_id = user_id,
                    "Rebinding linked account to a different user"
                );

                let revoked = tx
                    .execute(
                        r#"
                        DELETE FROM user_ads
                        WHERE user_id = ?1
                          AND ad_id IN (
                              SELECT a.ad_id FROM ads a
                              JOIN ad_accounts acc ON acc.account_id = a.account_id
                              WHERE acc.platform = ?2 AND acc.external_account_id = ?3
                          )
                        "#,
                        params![previous, platform, external_id],
                    )
                    .with_context(|| {
                        format!("Failed to revoke previous owner's ads for {}", external_id)
                    })?;
                debug!(
                    previous_user_id = previous,
                    revoked = revoked,
                    "Revoked ad ownership from previous account owner"
                );
            }

            tx.execute(
                r#"
                INSERT INTO ad_accounts (
                    user_id, platform, external_account_id, token_owner,
                    status, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(platform, external_account_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    token_owner = excluded.token_owner,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                "#,
                params![user_id, platform, external_id, token_owner, STATUS_LINKED, now],
            )
            .with_context(|| format!("Failed to link account {}", external_id))?;
        }

        tx.commit().context("Failed to commit linked accounts")?;
        debug!(user_id = user_id, count = external_ids.len(), "Linked accounts");
        Ok(external_ids.len())
    }

    /// Internal id of an account linked to `user_id`.
    pub fn account_id(
        &self,
        user_id: i64,
        platform: &str,
        external_id: &str,
    ) -> Result<Option<i64>> {
        let external_id = normalize_account_id(external_id);
        self.db
            .lock()?
            .query_row(
                r#"
                SELECT account_id FROM ad_accounts
                WHERE user_id = ?1 AND platform = ?2 AND external_account_id = ?3
                LIMIT 1
                "#,
                params![user_id, platform, external_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up account id")
    }

    /// Every linked account, for the scheduled sync.
    pub fn list_linked(&self) -> Result<Vec<LinkedAccount>> {
        self.query_accounts(
            r#"
            SELECT account_id, user_id, platform, external_account_id, token_owner, status
            FROM ad_accounts
            WHERE status = ?1
            ORDER BY account_id
            "#,
            params![STATUS_LINKED],
        )
    }

    fn query_accounts(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<LinkedAccount>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql).context("Failed to prepare account query")?;
        let accounts = stmt
            .query_map(args, |row| {
                Ok(LinkedAccount {
                    account_id: row.get(0)?,
                    user_id: row.get(1)?,
                    platform: row.get(2)?,
                    external_account_id: row.get(3)?,
                    token_owner: row.get(4)?,
                    status: row.get(5)?,
                })
            })
            .context("Failed to query accounts")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read account row")?;
        Ok(accounts)
    }

    /// Writes one cost row: creates the ad if unseen, links it to the user,
    /// and overwrites spend in both the insight and the daily rollup.
    ///
    /// The four writes commit together or not at all.
    pub fn apply_cost_row(
        &self,
        user_id: i64,
        account_id: i64,
        record: &SpendRecord,
    ) -> Result<(), RowWriteError> {
        let mut conn = self
            .db
            .lock()
            .map_err(|e| RowWriteError::new(RowStage::Transaction, e))?;
        let tx = conn
            .transaction()
            .map_err(|e| RowWriteError::new(RowStage::Transaction, e))?;

        let platform: String = tx
            .query_row(
                "SELECT platform FROM ad_accounts WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(|e| RowWriteError::new(RowStage::EnsureAd, e))?;
        tx.execute(
            r#"
            INSERT INTO ads (ad_id, account_id, name, status, platform)
            VALUES (?1, ?2, ?3, 'active', ?4)
            ON CONFLICT(ad_id) DO NOTHING
            "#,
            params![
                record.ad_id,
                account_id,
                format!("ad-{}", record.ad_id),
                platform
            ],
        )
        .map_err(|e| RowWriteError::new(RowStage::EnsureAd, e))?;

        tx.execute(ENSURE_OWNERSHIP_SQL, params![user_id, record.ad_id])
            .map_err(|e| RowWriteError::new(RowStage::EnsureOwnership, e))?;

        let date = record.date.to_string();
        let spend = record.spend().to_string();

        tx.execute(
            r#"
            INSERT INTO ads_insights (ad_id, metric_date, spend)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(ad_id, metric_date) DO UPDATE SET spend = excluded.spend
            "#,
            params![record.ad_id, date, spend],
        )
        .map_err(|e| RowWriteError::new(RowStage::UpsertInsight, e))?;

        tx.execute(
            r#"
            INSERT INTO ad_daily_metrics (ad_id, metric_date, spend)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(ad_id, metric_date) DO UPDATE SET spend = excluded.spend
            "#,
            params![record.ad_id, date, spend],
        )
        .map_err(|e| RowWriteError::new(RowStage::UpsertDailyMetric, e))?;

        tx.commit()
            .map_err(|e| RowWriteError::new(RowStage::Transaction, e))
    }
}
