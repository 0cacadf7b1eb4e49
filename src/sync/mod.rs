//! Cost reconciliation: external spend into per-ad daily metrics.
//!
//! For one (user, account, date) the service resolves the linked account,
//! opens the cost feed and applies rows strictly one after another. Each row
//! commits on its own; a failure stops the remaining rows and names the ad and
//! the stage that failed. Re-running a date is safe because every write is an
//! overwrite.

mod guard;
mod scheduler;

pub use guard::{InFlightGuard, InFlightPermit, SyncKey};
pub use scheduler::run_scheduled_sync;

use crate::ads::{AdsError, CostFeed};
use crate::metrics::{MetricsAuthorizer, MetricsError};
use crate::store::{normalize_account_id, AccountsRepo, RowStage, RowWriteError, SpendRecord};
use crate::validation::AmountValidator;
use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account {external_account_id} is not linked")]
    AccountNotLinked { external_account_id: String },
    #[error("account lookup failed: {0:#}")]
    AccountLookup(anyhow::Error),
    #[error("a sync for this account and date is already running")]
    AlreadyRunning,
    #[error("cost feed failed: {0}")]
    Upstream(#[source] AdsError),
    #[error("cost row for ad {ad_id} failed at {}", .source.stage)]
    Row {
        ad_id: i64,
        #[source]
        source: RowWriteError,
    },
    #[error("sync cancelled")]
    Cancelled,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<AdsError> for SyncError {
    fn from(error: AdsError) -> Self {
        match error {
            AdsError::Cancelled => SyncError::Cancelled,
            other => SyncError::Upstream(other),
        }
    }
}

/// Outcome of one successful sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub rows_applied: usize,
    /// Distinct synced ad ids the user can now read, in first-seen order.
    pub visible_ad_ids: Vec<i64>,
}

pub struct CostSyncService {
    feed: Arc<dyn CostFeed>,
    accounts: Arc<AccountsRepo>,
    authorizer: Arc<MetricsAuthorizer>,
    validator: AmountValidator,
    in_flight: InFlightGuard,
    platform: String,
}

impl CostSyncService {
    pub fn new(
        feed: Arc<dyn CostFeed>,
        accounts: Arc<AccountsRepo>,
        authorizer: Arc<MetricsAuthorizer>,
        validator: AmountValidator,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            feed,
            accounts,
            authorizer,
            validator,
            in_flight: InFlightGuard::new(),
            platform: platform.into(),
        }
    }

    /// Reconciles spend for one external account and one calendar date.
    pub async fn sync_costs_for_date(
        &self,
        user_id: i64,
        external_account_id: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let external_account_id = normalize_account_id(external_account_id);
        let _permit = self
            .in_flight
            .try_acquire(SyncKey {
                user_id,
                external_account_id: external_account_id.clone(),
                date,
            })
            .ok_or(SyncError::AlreadyRunning)?;

        let account_id = self
            .accounts
            .account_id(user_id, &self.platform, &external_account_id)
            .map_err(SyncError::AccountLookup)?
            .ok_or_else(|| SyncError::AccountNotLinked {
                external_account_id: external_account_id.clone(),
            })?;

        let mut rows = self
            .feed
            .open_costs(user_id, &external_account_id, date, cancel)
            .await?;

        let mut applied = 0;
        let mut touched = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let row = match rows.next_row(cancel).await {
                None => break,
                Some(row) => row?,
            };

            if row.date != date {
                debug!(ad_id = row.ad_id, row_date = %row.date, "Row date differs from requested date");
            }

            let record = SpendRecord {
                ad_id: row.ad_id,
                date: row.date,
                cost_micros: row.cost_micros,
            };
            self.validator
                .validate_micros(record.cost_micros)
                .map_err(|e| SyncError::Row {
                    ad_id: record.ad_id,
                    source: RowWriteError::new(RowStage::Validate, e),
                })?;

            self.accounts
                .apply_cost_row(user_id, account_id, &record)
                .map_err(|source| {
                    warn!(
                        user_id = user_id,
                        ad_id = record.ad_id,
                        stage = %source.stage,
                        error = %source,
                        "Cost row failed"
                    );
                    SyncError::Row {
                        ad_id: record.ad_id,
                        source,
                    }
                })?;

            applied += 1;
            if !touched.contains(&record.ad_id) {
                touched.push(record.ad_id);
            }
        }

        let visible_ad_ids = if touched.is_empty() {
            Vec::new()
        } else {
            match self.authorizer.authorize(user_id, &touched) {
                Ok(ids) => ids,
                Err(MetricsError::NoAdAccess) => Vec::new(),
                Err(e) => return Err(SyncError::Storage(e.into())),
            }
        };

        info!(
            user_id = user_id,
            external_account_id = %external_account_id,
            date = %date,
            rows = applied,
            "Cost sync complete"
        );

        Ok(SyncReport {
            rows_applied: applied,
            visible_ad_ids,
        })
    }

    /// Syncs every linked account of this platform for `date`, continuing
    /// past per-account failures. Returns (succeeded, failed).
    pub async fn sync_linked_accounts(
        &self,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<(usize, usize), SyncError> {
        let accounts = self.accounts.list_linked()?;
        let mut succeeded = 0;
        let mut failed = 0;

        for account in accounts.iter().filter(|a| a.platform == self.platform) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match self
                .sync_costs_for_date(account.user_id, &account.external_account_id, date, cancel)
                .await
            {
                Ok(_) => succeeded += 1,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    failed += 1;
                    warn!(
                        user_id = account.user_id,
                        external_account_id = %account.external_account_id,
                        date = %date,
                        error = %e,
                        "Scheduled sync failed for account"
                    );
                }
            }
        }

        Ok((succeeded, failed))
    }
}
