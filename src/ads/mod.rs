//! External advertising API integration.
//!
//! - [`token_source`]: refresh token in the vault -> short-lived access token
//! - [`retry`]: which failures are retried and how long to wait
//! - [`stream`]: lazy cost-row decoding of streaming query responses
//! - [`client`]: account listing and cost queries with the above applied

pub mod client;
pub mod retry;
pub mod stream;
pub mod token_source;

pub use client::{AccessibleCustomers, AdsClient, AdsClientConfig};
pub use retry::{Observation, RetryDecision, RetryPolicy};
pub use stream::{CostRow, CostRowStream, CostRows};
pub use token_source::{AccessToken, AccessTokenProvider, TokenError, TokenSource};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AdsError {
    #[error(transparent)]
    Token(#[from] TokenError),
    /// The API answered 401; the credential has been flagged.
    #[error("reauthorization required")]
    ReauthorizationRequired,
    #[error("ads API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ads API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("ads API retries exhausted")]
    RetriesExhausted,
    #[error("malformed ads API response: {0}")]
    Decode(String),
    #[error("ads API call cancelled")]
    Cancelled,
}

impl AdsError {
    /// The user must connect (again) before any call can succeed.
    pub fn requires_consent(&self) -> bool {
        match self {
            AdsError::ReauthorizationRequired => true,
            AdsError::Token(e) => e.is_missing_credential(),
            _ => false,
        }
    }
}

/// Where the sync service gets its cost rows from.
#[async_trait]
pub trait CostFeed: Send + Sync {
    async fn open_costs(
        &self,
        user_id: i64,
        external_account_id: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn CostRows>, AdsError>;
}
