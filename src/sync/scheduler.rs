use super::{CostSyncService, SyncError};
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The `lookback_days` calendar days before `today`, oldest first.
pub(crate) fn lookback_dates(today: NaiveDate, lookback_days: u32) -> Vec<NaiveDate> {
    (1..=i64::from(lookback_days.max(1)))
        .rev()
        .filter_map(|days| today.checked_sub_signed(Duration::days(days)))
        .collect()
}

/// Background task that re-syncs every linked account on a fixed interval.
pub async fn run_scheduled_sync(
    service: Arc<CostSyncService>,
    interval: std::time::Duration,
    lookback_days: u32,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scheduled sync stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        for date in lookback_dates(Utc::now().date_naive(), lookback_days) {
            match service.sync_linked_accounts(date, &cancel).await {
                Ok((succeeded, failed)) => info!(
                    date = %date,
                    succeeded = succeeded,
                    failed = failed,
                    "Scheduled sync pass complete"
                ),
                Err(SyncError::Cancelled) => {
                    debug!("Scheduled sync cancelled mid-pass");
                    return;
                }
                Err(e) => error!(date = %date, error = %e, "Scheduled sync pass failed"),
            }
        }
    }
}
