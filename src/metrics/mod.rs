//! Per-user metrics access.
//!
//! Every read goes through [`MetricsAuthorizer`], which narrows a request to
//! the ads the user owns. Asking only for ads outside that set is a denial,
//! never an empty success.

use crate::store::{DailyMetricRow, MetricsRepo, OwnershipRepo};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Longest queryable span between `from` and `to`.
pub const MAX_RANGE_DAYS: i64 = 90;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid_date_range")]
    InvalidRange,
    #[error("bad_ad_id")]
    BadAdId,
    #[error("ad_not_found")]
    NoAdAccess,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Intersects `requested` with `owned`, keeping the requested order and
/// dropping repeats. An empty request selects everything owned.
pub fn scope_ad_ids(owned: &[i64], requested: &[i64]) -> Vec<i64> {
    if requested.is_empty() {
        return owned.to_vec();
    }

    let owned: HashSet<i64> = owned.iter().copied().collect();
    let mut seen = HashSet::new();
    requested
        .iter()
        .copied()
        .filter(|id| owned.contains(id) && seen.insert(*id))
        .collect()
}

pub struct MetricsAuthorizer {
    ownership: Arc<OwnershipRepo>,
}

impl MetricsAuthorizer {
    pub fn new(ownership: Arc<OwnershipRepo>) -> Self {
        Self { ownership }
    }

    /// The ad ids `user_id` may read out of `requested`.
    pub fn authorize(&self, user_id: i64, requested: &[i64]) -> Result<Vec<i64>, MetricsError> {
        let owned = self.ownership.ids_by_user(user_id)?;
        if owned.is_empty() {
            return Err(MetricsError::NoAdAccess);
        }

        let scope = scope_ad_ids(&owned, requested);
        if scope.is_empty() {
            tracing::debug!(user_id = user_id, requested = ?requested, "No requested ad is owned");
            return Err(MetricsError::NoAdAccess);
        }
        Ok(scope)
    }
}

/// Query filter. `from`/`to` are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsFilter {
    pub ad_ids: Vec<i64>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl MetricsFilter {
    /// Parses raw query values. `to` defaults to yesterday and `from` to the
    /// first day of `to`'s month.
    pub fn parse(
        ad_ids: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, MetricsError> {
        let to = match to.filter(|s| !s.is_empty()) {
            Some(raw) => parse_date(raw)?,
            None => today - Duration::days(1),
        };
        let from = match from.filter(|s| !s.is_empty()) {
            Some(raw) => parse_date(raw)?,
            None => to.with_day(1).unwrap_or(to),
        };

        Ok(Self {
            ad_ids: parse_ad_ids(ad_ids.unwrap_or_default())?,
            from,
            to,
        })
    }

    pub fn validate_range(&self) -> Result<(), MetricsError> {
        if self.to < self.from || (self.to - self.from).num_days() > MAX_RANGE_DAYS {
            return Err(MetricsError::InvalidRange);
        }
        Ok(())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, MetricsError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| MetricsError::InvalidRange)
}

/// `"87, 91"` -> `[87, 91]`; ids must be positive integers.
fn parse_ad_ids(raw: &str) -> Result<Vec<i64>, MetricsError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|part| match part.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(MetricsError::BadAdId),
        })
        .collect()
}

/// One day of one ad as returned to clients. Money is rendered as decimal
/// strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyMetricView {
    pub ad_id: i64,
    pub name: String,
    pub status: String,
    pub day: String,
    pub clicks: i64,
    pub conversions: i64,
    pub revenue: String,
    pub spend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roas: Option<String>,
}

impl From<DailyMetricRow> for DailyMetricView {
    fn from(row: DailyMetricRow) -> Self {
        let cpa = (row.conversions > 0)
            .then(|| row.spend.checked_div(Decimal::from(row.conversions)))
            .flatten()
            .map(|cpa| fixed(cpa, 2));
        let roas = (!row.spend.is_zero())
            .then(|| row.revenue.checked_div(row.spend))
            .flatten()
            .map(|roas| fixed(roas, 4));

        Self {
            ad_id: row.ad_id,
            name: row.ad_name.unwrap_or_default(),
            status: row.ad_status.unwrap_or_default(),
            day: row.date.format("%Y-%m-%d").to_string(),
            clicks: row.clicks,
            conversions: row.conversions,
            revenue: row.revenue.normalize().to_string(),
            spend: row.spend.normalize().to_string(),
            cpa,
            roas,
        }
    }
}

fn fixed(value: Decimal, dp: u32) -> String {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded.to_string()
}

pub struct MetricsService {
    authorizer: Arc<MetricsAuthorizer>,
    repo: Arc<MetricsRepo>,
}

impl MetricsService {
    pub fn new(authorizer: Arc<MetricsAuthorizer>, repo: Arc<MetricsRepo>) -> Self {
        Self { authorizer, repo }
    }

    pub fn get(&self, user_id: i64, filter: &MetricsFilter) -> Result<Vec<DailyMetricView>, MetricsError> {
        filter.validate_range()?;
        let scope = self.authorizer.authorize(user_id, &filter.ad_ids)?;
        let rows = self.repo.list(&scope, filter.from, filter.to)?;
        Ok(rows.into_iter().map(DailyMetricView::from).collect())
    }
}
