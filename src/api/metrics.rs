//! Per-ad daily metrics query endpoint.

use super::error::AppError;
use crate::auth::authenticate;
use crate::metrics::{DailyMetricView, MetricsFilter, MetricsService};
use crate::store::SessionStore;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Shared application state for metrics API
#[derive(Clone)]
pub struct MetricsAppState {
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<MetricsService>,
}

/// `?ad_id=87,91&from=2025-07-01&to=2025-07-19`, every field optional
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub ad_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Create metrics API router
pub fn create_metrics_router(state: MetricsAppState) -> Router {
    Router::new()
        .route("/api/metrics", get(get_metrics))
        .with_state(Arc::new(state))
}

/// GET /api/metrics
///
/// Defaults to the first of the current month through yesterday. Only ads
/// the caller owns are ever returned.
async fn get_metrics(
    State(state): State<Arc<MetricsAppState>>,
    Query(query): Query<MetricsQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<DailyMetricView>>, AppError> {
    let user_id = authenticate(&state.sessions, &headers)?;

    let filter = MetricsFilter::parse(
        query.ad_id.as_deref(),
        query.from.as_deref(),
        query.to.as_deref(),
        Utc::now().date_naive(),
    )?;

    let rows = state.metrics.get(user_id, &filter)?;
    debug!(
        user_id = user_id,
        from = %filter.from,
        to = %filter.to,
        rows = rows.len(),
        "Metrics query served"
    );

    Ok(Json(rows))
}
