use crate::store::SessionStore;
use axum::http::HeaderMap;
use thiserror::Error;


/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
/// Returns the token string if present and valid.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, BearerError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(BearerError::Missing)?
        .to_str()
        .map_err(|_| BearerError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Resolves the caller's user id from the session named by the bearer token.
pub fn authenticate(sessions: &SessionStore, headers: &HeaderMap) -> Result<i64, AuthError> {
    let token = extract_bearer_token(headers)?;
    sessions
        .resolve(&token)?
        .ok_or(AuthError::UnknownSession)
}

fn parse_bearer_token(header_value: &str) -> Result<String, BearerError> {
    let (scheme, token) = header_value
        .split_once(' ')
        .ok_or(BearerError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(BearerError::InvalidFormat);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(BearerError::Empty);
    }

    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BearerError {
    /// Authorization header not present
    #[error("Authorization token not provided")]
    Missing,
    /// Not "Bearer <token>"
    #[error("Invalid authorization token format")]
    InvalidFormat,
    #[error("Authorization token is empty")]
    Empty,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Bearer(#[from] BearerError),
    #[error("Unknown or expired session")]
    UnknownSession,
    #[error("Session lookup failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}
