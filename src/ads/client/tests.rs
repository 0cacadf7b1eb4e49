use super::*;
use crate::ads::token_source::TokenError;
use axum::{extract::State, routing::get, Router};
use mockito::Matcher;
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hands out a fixed token and records reauthorization marks.
#[derive(Default)]
struct FakeTokens {
    marks: Mutex<Vec<(i64, String)>>,
}

impl FakeTokens {
    fn marks(&self) -> Vec<(i64, String)> {
        self.marks.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccessTokenProvider for FakeTokens {
    async fn access_token(
        &self,
        _user_id: i64,
        _cancel: &CancellationToken,
    ) -> Result<AccessToken, TokenError> {
        Ok(AccessToken {
            token: "ya29.test".to_string(),
            external_identity: "sub-1".to_string(),
        })
    }

    fn mark_needs_reauth(&self, user_id: i64, external_identity: &str) -> Result<(), VaultError> {
        self.marks
            .lock()
            .unwrap()
            .push((user_id, external_identity.to_string()));
        Ok(())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, vec![Duration::from_millis(1)])
}

fn client(base_url: String, tokens: Arc<FakeTokens>) -> AdsClient {
    AdsClient::new(
        reqwest::Client::new(),
        AdsClientConfig {
            base_url,
            developer_token: "dev-token".to_string(),
            login_customer_id: Some("111-222-3333".to_string()),
        },
        tokens,
    )
    .with_retry_policy(fast_policy())
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[test]
fn test_cost_query() {
    assert_eq!(
        cost_query(date("2025-07-24")),
        "SELECT ad_group_ad.ad.id, segments.date, metrics.cost_micros FROM ad_group_ad WHERE segments.date = '2025-07-24'"
    );
}

#[tokio::test]
async fn test_list_accessible_customers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .match_header("authorization", "Bearer ya29.test")
        .match_header("developer-token", "dev-token")
        .match_header("login-customer-id", "1112223333")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"resourceNames": ["customers/1234567890", "customers/555"]}"#)
        .create_async()
        .await;

    let tokens = Arc::new(FakeTokens::default());
    let result = client(server.url(), tokens.clone())
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result.customer_ids, vec!["1234567890", "555"]);
    assert_eq!(result.external_identity, "sub-1");
    assert!(tokens.marks().is_empty());
}

#[tokio::test]
async fn test_unauthorized_marks_once_without_retry() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .with_status(401)
        .with_body(r#"{"error":{"status":"UNAUTHENTICATED"}}"#)
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(FakeTokens::default());
    let err = client(server.url(), tokens.clone())
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, AdsError::ReauthorizationRequired));
    assert!(err.requires_consent());
    assert_eq!(tokens.marks(), vec![(1, "sub-1".to_string())]);
}

#[tokio::test]
async fn test_two_unavailable_then_success() {
    async fn flaky(State(hits): State<Arc<Mutex<Vec<Instant>>>>) -> axum::response::Response {
        use axum::response::IntoResponse;
        let attempt = {
            let mut hits = hits.lock().unwrap();
            hits.push(Instant::now());
            hits.len()
        };
        if attempt <= 2 {
            (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy").into_response()
        } else {
            axum::Json(json!({"resourceNames": ["customers/42"]})).into_response()
        }
    }

    let hits = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/customers:listAccessibleCustomers", get(flaky))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let first_wait = Duration::from_millis(40);
    let second_wait = Duration::from_millis(80);
    let tokens = Arc::new(FakeTokens::default());
    let result = client(format!("http://{}", addr), tokens.clone())
        .with_retry_policy(RetryPolicy::new(3, vec![first_wait, second_wait]))
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.customer_ids, vec!["42"]);
    assert!(tokens.marks().is_empty());

    // Three attempts, separated by the first and then the second backoff
    let hits = hits.lock().unwrap().clone();
    assert_eq!(hits.len(), 3);
    assert!(hits[1] - hits[0] >= first_wait, "{:?}", hits[1] - hits[0]);
    assert!(hits[2] - hits[1] >= second_wait, "{:?}", hits[2] - hits[1]);
}

#[tokio::test]
async fn test_persistent_unavailable_returns_last_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .with_status(503)
        .with_body("backend unavailable")
        .expect(3)
        .create_async()
        .await;

    let err = client(server.url(), Arc::new(FakeTokens::default()))
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    match err {
        AdsError::Api { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "backend unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .with_status(429)
        .expect(3)
        .create_async()
        .await;

    let err = client(server.url(), Arc::new(FakeTokens::default()))
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, AdsError::Api { status: 429, .. }));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .with_status(403)
        .with_body(r#"{"error":"DEVELOPER_TOKEN_NOT_APPROVED"}"#)
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(FakeTokens::default());
    let err = client(server.url(), tokens.clone())
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap_err();

    mock.assert_async().await;
    match err {
        AdsError::Api { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("DEVELOPER_TOKEN_NOT_APPROVED"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tokens.marks().is_empty());
}

#[tokio::test]
async fn test_transport_failure_exhausts_attempts() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(format!("http://{}", addr), Arc::new(FakeTokens::default()))
        .list_accessible_customers(1, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AdsError::Transport(_)));
}

#[tokio::test]
async fn test_cancel_aborts_retry_wait() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/customers:listAccessibleCustomers")
        .with_status(503)
        .create_async()
        .await;

    let client = client(server.url(), Arc::new(FakeTokens::default()))
        .with_retry_policy(RetryPolicy::new(3, vec![Duration::from_secs(30)]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.list_accessible_customers(1, &cancel),
    )
    .await
    .expect("cancellation did not interrupt the retry wait");

    assert!(matches!(result, Err(AdsError::Cancelled)));
}

#[tokio::test]
async fn test_costs_for_date_streams_rows() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/customers/1234567890/googleAds:searchStream")
        .match_header("authorization", "Bearer ya29.test")
        .match_body(Matcher::PartialJson(json!({
            "query": cost_query(date("2025-07-24"))
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"results": [
                {"adGroupAd": {"ad": {"id": "100000"}}, "segments": {"date": "2025-07-24"}, "metrics": {"costMicros": "5000000"}},
                {"adGroupAd": {"ad": {"id": "100001"}}, "segments": {"date": "2025-07-24"}, "metrics": {"costMicros": "12345000"}}
            ]}]"#,
        )
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    let mut rows = client(server.url(), Arc::new(FakeTokens::default()))
        .costs_for_date(1, "123-456-7890", date("2025-07-24"), &cancel)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(row) = rows.next(&cancel).await {
        seen.push(row.unwrap());
    }

    mock.assert_async().await;
    assert_eq!(
        seen.iter().map(|r| (r.ad_id, r.cost_micros)).collect::<Vec<_>>(),
        vec![(100000, 5_000_000), (100001, 12_345_000)]
    );
}

#[tokio::test]
async fn test_costs_for_date_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/customers/1234567890/googleAds:searchStream")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(FakeTokens::default());
    let result = client(server.url(), tokens.clone())
        .open_costs(1, "1234567890", date("2025-07-24"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(AdsError::ReauthorizationRequired)));
    assert_eq!(tokens.marks().len(), 1);
}
