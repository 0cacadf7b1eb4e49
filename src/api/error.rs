//! HTTP error mapping shared by every router.

use crate::ads::AdsError;
use crate::auth::AuthError;
use crate::metrics::MetricsError;
use crate::sync::SyncError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::error;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for API endpoints
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Storage(e) => {
                error!(error = %e, "Session lookup failed");
                AppError::ServerError("session lookup failed".to_string())
            }
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl From<AdsError> for AppError {
    fn from(error: AdsError) -> Self {
        if error.requires_consent() {
            return AppError::Unauthorized("reauthorization required".to_string());
        }
        match error {
            AdsError::Cancelled => AppError::ServerError("request cancelled".to_string()),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::AccountNotLinked { .. } => AppError::BadRequest(error.to_string()),
            SyncError::AlreadyRunning => AppError::Conflict(error.to_string()),
            SyncError::Upstream(e) => e.into(),
            SyncError::Row { .. } => AppError::BadGateway(error.to_string()),
            SyncError::Cancelled => AppError::ServerError(error.to_string()),
            SyncError::AccountLookup(_) | SyncError::Storage(_) => {
                error!(error = %error, "Cost sync storage failure");
                AppError::ServerError("sync failed".to_string())
            }
        }
    }
}

impl From<MetricsError> for AppError {
    fn from(error: MetricsError) -> Self {
        match error {
            MetricsError::InvalidRange | MetricsError::BadAdId => {
                AppError::BadRequest(error.to_string())
            }
            MetricsError::NoAdAccess => AppError::NotFound(error.to_string()),
            MetricsError::Storage(e) => {
                error!(error = %e, "Metrics query failed");
                AppError::ServerError("metrics query failed".to_string())
            }
        }
    }
}
