//! Google Ads REST client.

use super::retry::{is_retryable, Observation, RetryDecision, RetryPolicy};
use super::stream::{CostRowStream, CostRows};
use super::token_source::{AccessToken, AccessTokenProvider};
use super::{AdsError, CostFeed};
use crate::credentials::VaultError;
use crate::store::normalize_account_id;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://googleads.googleapis.com/v21";

/// Static request settings.
#[derive(Clone)]
pub struct AdsClientConfig {
    pub base_url: String,
    pub developer_token: String,
    /// Manager account the requests act through, if any.
    pub login_customer_id: Option<String>,
}

impl std::fmt::Debug for AdsClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsClientConfig")
            .field("base_url", &self.base_url)
            .field("login_customer_id", &self.login_customer_id)
            .finish_non_exhaustive()
    }
}

/// Accounts reachable with a user's credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessibleCustomers {
    pub customer_ids: Vec<String>,
    pub external_identity: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccessibleCustomersResponse {
    #[serde(default)]
    resource_names: Vec<String>,
}

/// GAQL for per-ad cost on one day.
pub fn cost_query(date: NaiveDate) -> String {
    format!(
        "SELECT ad_group_ad.ad.id, segments.date, metrics.cost_micros FROM ad_group_ad WHERE segments.date = '{}'",
        date.format("%Y-%m-%d")
    )
}

pub struct AdsClient {
    http: reqwest::Client,
    config: AdsClientConfig,
    tokens: Arc<dyn AccessTokenProvider>,
    policy: RetryPolicy,
}

impl AdsClient {
    pub fn new(
        http: reqwest::Client,
        config: AdsClientConfig,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        Self {
            http,
            config,
            tokens,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Lists the customer ids the user's credential can reach
    /// (`customers/123` -> `123`).
    pub async fn list_accessible_customers(
        &self,
        user_id: i64,
        cancel: &CancellationToken,
    ) -> Result<AccessibleCustomers, AdsError> {
        let token = self.tokens.access_token(user_id, cancel).await?;
        let url = format!(
            "{}/customers:listAccessibleCustomers",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .send(user_id, &token, || self.authorized(self.http.get(&url), &token), cancel)
            .await?;
        let listing: ListAccessibleCustomersResponse = response.json().await?;

        let customer_ids = listing
            .resource_names
            .iter()
            .filter_map(|name| name.rsplit('/').next())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        info!(
            user_id = user_id,
            count = customer_ids.len(),
            "Listed accessible customers"
        );

        Ok(AccessibleCustomers {
            customer_ids,
            external_identity: token.external_identity,
        })
    }

    /// Opens the cost stream for one account and day. Rows come back in the
    /// order the API emits them.
    pub async fn costs_for_date(
        &self,
        user_id: i64,
        external_account_id: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<CostRowStream, AdsError> {
        let token = self.tokens.access_token(user_id, cancel).await?;
        let url = format!(
            "{}/customers/{}/googleAds:searchStream",
            self.config.base_url.trim_end_matches('/'),
            normalize_account_id(external_account_id)
        );
        let body = serde_json::json!({ "query": cost_query(date) });

        debug!(user_id = user_id, date = %date, "Opening cost stream");
        let response = self
            .send(
                user_id,
                &token,
                || self.authorized(self.http.post(&url), &token).json(&body),
                cancel,
            )
            .await?;

        Ok(CostRowStream::from_response(response))
    }

    fn authorized(&self, builder: RequestBuilder, token: &AccessToken) -> RequestBuilder {
        let builder = builder
            .bearer_auth(&token.token)
            .header("developer-token", &self.config.developer_token);

        match self.config.login_customer_id.as_deref() {
            Some(id) if !id.is_empty() => {
                builder.header("login-customer-id", normalize_account_id(id))
            }
            _ => builder,
        }
    }

    /// Sends with retries. A 401 ends the call at once: the credential is
    /// marked and [`AdsError::ReauthorizationRequired`] returned.
    async fn send<F>(
        &self,
        user_id: i64,
        token: &AccessToken,
        build: F,
        cancel: &CancellationToken,
    ) -> Result<Response, AdsError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts() {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AdsError::Cancelled),
                outcome = build().send() => outcome,
            };

            let observation = match outcome {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    self.mark_needs_reauth(user_id, &token.external_identity);
                    return Err(AdsError::ReauthorizationRequired);
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let error = AdsError::Api {
                        status: status.as_u16(),
                        body,
                    };
                    if !is_retryable(Observation::Status(status)) {
                        return Err(error);
                    }
                    last_error = Some(error);
                    Observation::Status(status)
                }
                Err(e) => {
                    last_error = Some(AdsError::Transport(e));
                    Observation::Transport
                }
            };

            match self.policy.should_retry(observation, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        user_id = user_id,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        observation = ?observation,
                        "Ads API request failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AdsError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Fail => break,
            }
        }

        Err(last_error.unwrap_or(AdsError::RetriesExhausted))
    }

    fn mark_needs_reauth(&self, user_id: i64, external_identity: &str) {
        match self.tokens.mark_needs_reauth(user_id, external_identity) {
            Ok(()) => warn!(
                user_id = user_id,
                external_identity = %external_identity,
                "Ads API rejected credential, reauthorization required"
            ),
            Err(VaultError::NotFound) => warn!(
                user_id = user_id,
                "Ads API rejected credential that is no longer in the vault"
            ),
            Err(e) => warn!(
                user_id = user_id,
                error = %e,
                "Failed to mark credential as needing reauthorization"
            ),
        }
    }
}

#[async_trait]
impl CostFeed for AdsClient {
    async fn open_costs(
        &self,
        user_id: i64,
        external_account_id: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn CostRows>, AdsError> {
        let stream = self
            .costs_for_date(user_id, external_account_id, date, cancel)
            .await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests;
