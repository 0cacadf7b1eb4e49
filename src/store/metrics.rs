//! Per-ad daily metric rollups.

use super::Database;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params_from_iter, types::Value};
use rust_decimal::Decimal;
use std::sync::Arc;

/// One row of `ad_daily_metrics`, joined with the ad it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyMetricRow {
    pub ad_id: i64,
    pub ad_name: Option<String>,
    pub ad_status: Option<String>,
    pub date: NaiveDate,
    pub clicks: i64,
    pub conversions: i64,
    pub revenue: Decimal,
    pub spend: Decimal,
}

pub struct MetricsRepo {
    db: Arc<Database>,
}

impl MetricsRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Rows for `ad_ids` with `from <= date <= to`, ordered by (ad, date).
    ///
    /// Callers pass an already-authorized id set; an empty set yields no rows.
    pub fn list(&self, ad_ids: &[i64], from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyMetricRow>> {
        if ad_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..ad_ids.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT m.ad_id, a.name, a.status, m.metric_date,
                   m.clicks, m.conversions, m.revenue, m.spend
            FROM ad_daily_metrics m
            LEFT JOIN ads a ON a.ad_id = m.ad_id
            WHERE m.metric_date BETWEEN ?1 AND ?2
              AND m.ad_id IN ({})
            ORDER BY m.ad_id, m.metric_date
            "#,
            placeholders
        );

        let mut args = vec![Value::Text(from.to_string()), Value::Text(to.to_string())];
        args.extend(ad_ids.iter().map(|id| Value::Integer(*id)));

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql).context("Failed to prepare metrics query")?;
        let raw = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .context("Failed to query daily metrics")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read daily metric row")?;

        raw.into_iter()
            .map(
                |(ad_id, ad_name, ad_status, date, clicks, conversions, revenue, spend)| {
                    Ok(DailyMetricRow {
                        ad_id,
                        ad_name,
                        ad_status,
                        date: date
                            .parse()
                            .with_context(|| format!("Invalid stored date '{}'", date))?,
                        clicks,
                        conversions,
                        revenue: parse_money(&revenue)?,
                        spend: parse_money(&spend)?,
                    })
                },
            )
            .collect()
    }
}

fn parse_money(value: &str) -> Result<Decimal> {
    value
        .parse()
        .with_context(|| format!("Invalid stored amount '{}'", value))
}
