//! Ads platform integration endpoints.
//!
//! Connect flow (authorization code with PKCE):
//! 1. POST /integrations/:provider/connect → state + verifier stored, authorization URL returned
//! 2. User consents on the provider's site
//! 3. Provider redirects to GET /integrations/:provider/callback
//! 4. State consumed, code exchanged with the verifier, refresh token encrypted into the vault
//!
//! After that the user lists reachable accounts, links the ones to track and
//! triggers cost syncs for them.

use super::error::AppError;
use crate::ads::AdsClient;
use crate::auth::authenticate;
use crate::credentials::{TokenVault, VaultError};
use crate::oauth::{
    generate_state, is_supported_provider, OAuthClient, OAuthStateStore, PkcePair, StateError,
};
use crate::store::{normalize_account_id, AccountsRepo, SessionStore};
use crate::sync::CostSyncService;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared application state for integration endpoints
#[derive(Clone)]
pub struct IntegrationsAppState {
    pub sessions: Arc<SessionStore>,
    pub states: Arc<OAuthStateStore>,
    pub vault: Arc<TokenVault>,
    pub oauth: OAuthClient,
    pub ads: Arc<AdsClient>,
    pub accounts: Arc<AccountsRepo>,
    pub sync: Arc<CostSyncService>,
    /// Parent of every request's cancellation token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectResponse {
    pub redirect_url: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct AccountsResponse {
    pub customer_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct LinkAccountsRequest {
    #[serde(default)]
    pub customer_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub customer_id: String,
    /// UTC calendar day, YYYY-MM-DD
    #[serde(default)]
    pub date: String,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub ok: bool,
    pub rows_applied: usize,
    /// Synced ads the caller can now read through the metrics API.
    pub visible_ad_ids: Vec<i64>,
}

/// Create integrations API router
pub fn create_integrations_router(state: IntegrationsAppState) -> Router {
    Router::new()
        .route("/integrations/:provider/connect", post(connect))
        .route("/integrations/:provider/callback", get(callback))
        .route("/integrations/:provider/accounts", get(list_accounts))
        .route("/integrations/:provider/link-accounts", post(link_accounts))
        .route("/integrations/:provider/sync", post(sync_costs))
        .with_state(Arc::new(state))
}

fn ensure_provider(provider: &str) -> Result<(), AppError> {
    if is_supported_provider(provider) {
        Ok(())
    } else {
        warn!(provider = %provider, "Unknown provider");
        Err(AppError::NotFound(format!("Provider '{}' not found", provider)))
    }
}

/// POST /integrations/:provider/connect
///
/// Issues a one-time state bound to a fresh PKCE verifier and returns the
/// provider's authorization URL.
async fn connect(
    State(state): State<Arc<IntegrationsAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ConnectResponse>, AppError> {
    ensure_provider(&provider)?;
    let user_id = authenticate(&state.sessions, &headers)?;

    let pkce = PkcePair::generate();
    let csrf_state = generate_state();
    state
        .states
        .save(&csrf_state, &pkce.verifier, user_id)
        .map_err(|e| {
            error!(user_id = user_id, error = %e, "Failed to save OAuth state");
            AppError::ServerError("failed to save state".to_string())
        })?;

    let redirect_url = state
        .oauth
        .config()
        .build_auth_url(&csrf_state, &pkce.challenge);

    info!(provider = %provider, user_id = user_id, "Issued authorization URL");

    Ok(Json(ConnectResponse { redirect_url }))
}

/// GET /integrations/:provider/callback
///
/// Not bearer-authenticated: the consumed state identifies the user. Every
/// state failure (unknown, expired, replayed) reads the same to the caller.
async fn callback(
    State(state): State<Arc<IntegrationsAppState>>,
    Path(provider): Path<String>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Json<StatusResponse>, AppError> {
    ensure_provider(&provider)?;
    debug!(provider = %provider, "OAuth callback received");

    if let Some(error) = callback.error {
        let description = callback
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "OAuth authorization failed");
        return Err(AppError::BadRequest(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let (code, csrf_state) = match (callback.code, callback.state) {
        (Some(code), Some(csrf_state)) if !code.is_empty() && !csrf_state.is_empty() => {
            (code, csrf_state)
        }
        _ => return Err(AppError::BadRequest("state/code missing".to_string())),
    };

    let consumed = state.states.consume(&csrf_state).map_err(|e| match e {
        StateError::InvalidOrExpired => {
            warn!("Invalid, expired or replayed OAuth state");
            AppError::BadRequest(e.to_string())
        }
        StateError::Storage(e) => {
            error!(error = %e, "Failed to consume OAuth state");
            AppError::ServerError("failed to consume state".to_string())
        }
    })?;
    let user_id = consumed.user_id;

    let cancel = state.shutdown.child_token();
    let grant = state
        .oauth
        .exchange_code(&code, &consumed.code_verifier, &cancel)
        .await
        .map_err(|e| {
            error!(user_id = user_id, error = %e, "Authorization code exchange failed");
            AppError::BadGateway("exchange failed".to_string())
        })?;

    let refresh_token = match grant.refresh_token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            warn!(user_id = user_id, "Provider granted no refresh token");
            return Err(AppError::BadRequest(
                "no refresh token granted (offline access with consent required)".to_string(),
            ));
        }
    };

    let external_identity = grant.external_identity();
    let scope = grant
        .scope
        .clone()
        .unwrap_or_else(|| state.oauth.config().scope());

    state
        .vault
        .save_refresh_token(user_id, &external_identity, refresh_token, &scope)
        .map_err(|e| {
            error!(user_id = user_id, error = %e, "Failed to store refresh token");
            AppError::ServerError("failed to store refresh token".to_string())
        })?;

    info!(
        provider = %provider,
        user_id = user_id,
        external_identity = %external_identity,
        "OAuth flow completed"
    );

    Ok(Json(StatusResponse { status: "ok" }))
}

/// GET /integrations/:provider/accounts
async fn list_accounts(
    State(state): State<Arc<IntegrationsAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AccountsResponse>, AppError> {
    ensure_provider(&provider)?;
    let user_id = authenticate(&state.sessions, &headers)?;

    let cancel = state.shutdown.child_token();
    let customers = state
        .ads
        .list_accessible_customers(user_id, &cancel)
        .await
        .map_err(|e| {
            warn!(user_id = user_id, error = %e, "Listing accessible customers failed");
            AppError::from(e)
        })?;

    Ok(Json(AccountsResponse {
        customer_ids: customers.customer_ids,
    }))
}

/// POST /integrations/:provider/link-accounts
///
/// Binds the chosen accounts to the caller; the identity of the caller's
/// active credential becomes the token owner.
async fn link_accounts(
    State(state): State<Arc<IntegrationsAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Result<Json<LinkAccountsRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    ensure_provider(&provider)?;
    let user_id = authenticate(&state.sessions, &headers)?;

    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let customer_ids: Vec<String> = request
        .customer_ids
        .iter()
        .map(|id| normalize_account_id(id.trim()))
        .filter(|id| !id.is_empty())
        .collect();
    if customer_ids.is_empty() {
        return Err(AppError::BadRequest("customer_ids required".to_string()));
    }

    let credential = state.vault.load_refresh_token(user_id).map_err(|e| match e {
        VaultError::NotFound => AppError::Unauthorized("reauthorization required".to_string()),
        other => {
            error!(user_id = user_id, error = %other, "Failed to load credential");
            AppError::ServerError("failed to load credential".to_string())
        }
    })?;

    let linked = state
        .accounts
        .link_accounts(user_id, &provider, &credential.external_identity, &customer_ids)
        .map_err(|e| {
            error!(user_id = user_id, error = %e, "Failed to link accounts");
            AppError::ServerError("link failed".to_string())
        })?;

    info!(provider = %provider, user_id = user_id, linked = linked, "Linked accounts");

    Ok(Json(StatusResponse { status: "linked" }))
}

/// POST /integrations/:provider/sync
///
/// Body: `{ "customer_id": "123-456-7890", "date": "YYYY-MM-DD" }`
async fn sync_costs(
    State(state): State<Arc<IntegrationsAppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, AppError> {
    ensure_provider(&provider)?;
    let user_id = authenticate(&state.sessions, &headers)?;

    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let customer_id = request.customer_id.trim();
    if customer_id.is_empty() || request.date.trim().is_empty() {
        return Err(AppError::BadRequest(
            "customer_id and date are required".to_string(),
        ));
    }
    let date = NaiveDate::parse_from_str(request.date.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest("date must be YYYY-MM-DD".to_string()))?;

    let cancel = state.shutdown.child_token();
    let report = state
        .sync
        .sync_costs_for_date(user_id, customer_id, date, &cancel)
        .await?;

    Ok(Json(SyncResponse {
        ok: true,
        rows_applied: report.rows_applied,
        visible_ad_ids: report.visible_ad_ids,
    }))
}
