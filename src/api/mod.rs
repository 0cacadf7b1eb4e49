// HTTP APIs: ads integrations and metrics

mod error;
pub mod integrations;
pub mod metrics;

pub use error::AppError;
pub use integrations::{create_integrations_router, IntegrationsAppState};
pub use metrics::{create_metrics_router, MetricsAppState};

use axum::Router;

/// Every API route in one router.
pub fn create_router(integrations: IntegrationsAppState, metrics: MetricsAppState) -> Router {
    Router::new()
        .merge(create_integrations_router(integrations))
        .merge(create_metrics_router(metrics))
}
