// Integration tests for the integrations API: connect, callback, accounts,
// linking and cost sync against a mocked provider and ads API

use adsync::ads::{AdsClient, AdsClientConfig, RetryPolicy, TokenSource};
use adsync::api::{create_router, IntegrationsAppState, MetricsAppState};
use adsync::credentials::{CredentialStatus, Encryptor, TokenVault};
use adsync::metrics::{MetricsAuthorizer, MetricsService};
use adsync::oauth::{OAuthClient, OAuthStateStore, ProviderConfig, GOOGLE};
use adsync::store::{AccountsRepo, Database, MetricsRepo, OwnershipRepo, SessionStore};
use adsync::sync::CostSyncService;
use adsync::validation::AmountValidator;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use mockito::{Matcher, Mock, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const USER_ID: i64 = 7;
const GOOGLE_SUB: &str = "google-sub-1";

struct TestApp {
    router: Router,
    server: ServerGuard,
    sessions: Arc<SessionStore>,
    vault: Arc<TokenVault>,
    accounts: Arc<AccountsRepo>,
}

impl TestApp {
    async fn new() -> Self {
        let server = mockito::Server::new_async().await;
        let db = Arc::new(Database::in_memory().unwrap());
        let http = reqwest::Client::new();

        let provider = ProviderConfig {
            auth_url: format!("{}/auth", server.url()),
            token_url: format!("{}/token", server.url()),
            scopes: vec!["https://www.googleapis.com/auth/adwords".to_string()],
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_url: "http://localhost:3000/integrations/google/callback".to_string(),
        };

        let sessions = Arc::new(SessionStore::new(db.clone()));
        let states = Arc::new(OAuthStateStore::new(db.clone(), chrono::Duration::minutes(10)));
        let encryptor = Encryptor::new(&URL_SAFE_NO_PAD.encode([7u8; 32])).unwrap();
        let vault = Arc::new(TokenVault::new(db.clone(), encryptor));
        let oauth = OAuthClient::new(http.clone(), provider);
        let tokens = Arc::new(TokenSource::new(vault.clone(), oauth.clone()));
        let ads = Arc::new(
            AdsClient::new(
                http,
                AdsClientConfig {
                    base_url: format!("{}/v21", server.url()),
                    developer_token: "dev-token".to_string(),
                    login_customer_id: None,
                },
                tokens,
            )
            .with_retry_policy(RetryPolicy::new(3, vec![Duration::from_millis(1)])),
        );

        let accounts = Arc::new(AccountsRepo::new(db.clone()));
        let authorizer = Arc::new(MetricsAuthorizer::new(Arc::new(OwnershipRepo::new(
            db.clone(),
        ))));
        let sync = Arc::new(CostSyncService::new(
            ads.clone(),
            accounts.clone(),
            authorizer.clone(),
            AmountValidator::default(),
            GOOGLE,
        ));
        let metrics = Arc::new(MetricsService::new(
            authorizer,
            Arc::new(MetricsRepo::new(db.clone())),
        ));

        let router = create_router(
            IntegrationsAppState {
                sessions: sessions.clone(),
                states,
                vault: vault.clone(),
                oauth,
                ads,
                accounts: accounts.clone(),
                sync,
                shutdown: CancellationToken::new(),
            },
            MetricsAppState {
                sessions: sessions.clone(),
                metrics,
            },
        );

        Self {
            router,
            server,
            sessions,
            vault,
            accounts,
        }
    }

    fn session(&self) -> String {
        self.sessions.issue(USER_ID).unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Runs connect and returns the issued state.
    async fn connect(&self, token: &str) -> String {
        let (status, json) = self
            .post("/integrations/google/connect", Some(token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let redirect_url = json["redirect_url"].as_str().unwrap();
        redirect_url
            .split('&')
            .find_map(|pair| pair.strip_prefix("state="))
            .map(|s| urlencoding::decode(s).unwrap().into_owned())
            .unwrap()
    }

    fn seed_credential(&self) {
        self.vault
            .save_refresh_token(USER_ID, GOOGLE_SUB, "refresh-1", "adwords")
            .unwrap();
    }

    async fn mock_code_exchange(&mut self, response: Value) -> Mock {
        self.server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response.to_string())
            .create_async()
            .await
    }

    async fn mock_refresh_exchange(&mut self) -> Mock {
        self.server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "refresh-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "access-1", "expires_in": 3599}).to_string())
            .create_async()
            .await
    }
}

fn id_token(sub: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(json!({ "sub": sub }).to_string())
    )
}

fn search_stream_body() -> String {
    json!([{
        "results": [
            {
                "adGroupAd": {"ad": {"id": "100000"}},
                "segments": {"date": "2025-07-24"},
                "metrics": {"costMicros": "5000000"}
            },
            {
                "adGroupAd": {"ad": {"id": "100001"}},
                "segments": {"date": "2025-07-24"},
                "metrics": {"costMicros": "12345000"}
            }
        ]
    }])
    .to_string()
}

#[tokio::test]
async fn test_full_connect_link_sync_and_query() {
    let mut app = TestApp::new().await;
    let token = app.session();

    // Connect and consent
    let state = app.connect(&token).await;
    let exchange = app
        .mock_code_exchange(json!({
            "access_token": "access-0",
            "refresh_token": "refresh-1",
            "expires_in": 3599,
            "scope": "https://www.googleapis.com/auth/adwords",
            "id_token": id_token(GOOGLE_SUB),
        }))
        .await;

    let callback_uri = format!("/integrations/google/callback?code=auth-code&state={}", state);
    let (status, json) = app.get(&callback_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"status": "ok"}));
    exchange.assert_async().await;
    assert_eq!(
        app.vault.status(USER_ID, GOOGLE_SUB).unwrap(),
        Some(CredentialStatus::Active)
    );

    // The state is single-use
    let (status, json) = app.get(&callback_uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid state");

    // List reachable accounts
    let _refresh = app.mock_refresh_exchange().await;
    let list = app
        .server
        .mock("GET", "/v21/customers:listAccessibleCustomers")
        .match_header("authorization", "Bearer access-1")
        .match_header("developer-token", "dev-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"resourceNames": ["customers/1234567890"]}).to_string())
        .create_async()
        .await;

    let (status, json) = app
        .get("/integrations/google/accounts", Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"customer_ids": ["1234567890"]}));
    list.assert_async().await;

    // Link the account
    let (status, json) = app
        .post(
            "/integrations/google/link-accounts",
            Some(&token),
            json!({"customer_ids": ["123-456-7890"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"status": "linked"}));
    let linked = app.accounts.list_linked().unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].external_account_id, "1234567890");
    assert_eq!(linked[0].token_owner, GOOGLE_SUB);

    // Sync one day of costs
    let search = app
        .server
        .mock("POST", "/v21/customers/1234567890/googleAds:searchStream")
        .match_body(Matcher::PartialJson(json!({
            "query": "SELECT ad_group_ad.ad.id, segments.date, metrics.cost_micros FROM ad_group_ad WHERE segments.date = '2025-07-24'"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(search_stream_body())
        .expect(2)
        .create_async()
        .await;

    let sync_body = json!({"customer_id": "123-456-7890", "date": "2025-07-24"});
    let (status, json) = app
        .post("/integrations/google/sync", Some(&token), sync_body.clone())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"ok": true, "rows_applied": 2, "visible_ad_ids": [100000, 100001]})
    );

    // Replaying the same day changes nothing
    let (status, _) = app
        .post("/integrations/google/sync", Some(&token), sync_body)
        .await;
    assert_eq!(status, StatusCode::OK);
    search.assert_async().await;

    // Exactly the two synced rows are visible to the user
    let (status, json) = app
        .get("/api/metrics?from=2025-07-24&to=2025-07-24", Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["ad_id"], 100000);
    assert_eq!(rows[0]["day"], "2025-07-24");
    assert_eq!(rows[0]["spend"], "5");
    assert_eq!(rows[0]["name"], "ad-100000");
    assert_eq!(rows[1]["ad_id"], 100001);
    assert_eq!(rows[1]["spend"], "12.345");

    // Another user sees nothing
    let other = app.sessions.issue(USER_ID + 1).unwrap();
    let (status, json) = app
        .get("/api/metrics?from=2025-07-24&to=2025-07-24", Some(&other))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "ad_not_found");
}

#[tokio::test]
async fn test_connect_requires_session() {
    let app = TestApp::new().await;

    let (status, _) = app
        .post("/integrations/google/connect", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/integrations/google/connect", Some("unknown"), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_provider() {
    let app = TestApp::new().await;
    let token = app.session();

    let (status, _) = app
        .post("/integrations/facebook/connect", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_returns_pkce_authorization_url() {
    let app = TestApp::new().await;
    let token = app.session();

    let (status, json) = app
        .post("/integrations/google/connect", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let url = json["redirect_url"].as_str().unwrap();
    assert!(url.starts_with(&format!("{}/auth?", app.server.url())));
    assert!(url.contains("client_id=client-id"));
    assert!(url.contains("access_type=offline"));
    assert!(url.contains("prompt=consent"));
    assert!(url.contains("code_challenge="));
    assert!(url.contains("code_challenge_method=S256"));
}

#[tokio::test]
async fn test_callback_state_failures() {
    let app = TestApp::new().await;

    let (status, _) = app
        .get("/integrations/google/callback?code=abc", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = app
        .get("/integrations/google/callback?code=abc&state=never-issued", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid state");

    let (status, _) = app
        .get(
            "/integrations/google/callback?error=access_denied&error_description=denied",
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_without_refresh_token() {
    let mut app = TestApp::new().await;
    let token = app.session();
    let state = app.connect(&token).await;
    let _exchange = app
        .mock_code_exchange(json!({"access_token": "access-0", "expires_in": 3599}))
        .await;

    let (status, _) = app
        .get(
            &format!("/integrations/google/callback?code=abc&state={}", state),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.vault.load_refresh_token(USER_ID).is_err());
}

#[tokio::test]
async fn test_callback_exchange_failure() {
    let mut app = TestApp::new().await;
    let token = app.session();
    let state = app.connect(&token).await;
    let _exchange = app
        .server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let (status, json) = app
        .get(
            &format!("/integrations/google/callback?code=abc&state={}", state),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "exchange failed");
}

#[tokio::test]
async fn test_accounts_without_credential() {
    let app = TestApp::new().await;
    let token = app.session();

    let (status, json) = app
        .get("/integrations/google/accounts", Some(&token))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "reauthorization required");
}

#[tokio::test]
async fn test_link_accounts_validation() {
    let app = TestApp::new().await;
    let token = app.session();

    // No credential yet
    let (status, _) = app
        .post(
            "/integrations/google/link-accounts",
            Some(&token),
            json!({"customer_ids": ["1234567890"]}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    app.seed_credential();

    let (status, _) = app
        .post(
            "/integrations/google/link-accounts",
            Some(&token),
            json!({"customer_ids": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/integrations/google/link-accounts", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/integrations/google/link-accounts",
            Some(&token),
            json!({"customer_ids": "1234567890"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sync_request_validation() {
    let app = TestApp::new().await;
    let token = app.session();

    let (status, _) = app
        .post(
            "/integrations/google/sync",
            Some(&token),
            json!({"date": "2025-07-24"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/integrations/google/sync",
            Some(&token),
            json!({"customer_id": "1234567890", "date": "24.07.2025"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Well-formed but not linked
    let (status, _) = app
        .post(
            "/integrations/google/sync",
            Some(&token),
            json!({"customer_id": "1234567890", "date": "2025-07-24"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/integrations/google/sync",
            None,
            json!({"customer_id": "1234567890", "date": "2025-07-24"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_revoked_consent_marks_credential() {
    let mut app = TestApp::new().await;
    let token = app.session();
    app.seed_credential();
    app.accounts
        .link_accounts(USER_ID, GOOGLE, GOOGLE_SUB, &["1234567890".to_string()])
        .unwrap();

    let _refresh = app.mock_refresh_exchange().await;
    let search = app
        .server
        .mock("POST", "/v21/customers/1234567890/googleAds:searchStream")
        .with_status(401)
        .with_body(r#"{"error":{"code":401}}"#)
        .expect(1)
        .create_async()
        .await;

    let (status, json) = app
        .post(
            "/integrations/google/sync",
            Some(&token),
            json!({"customer_id": "1234567890", "date": "2025-07-24"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "reauthorization required");
    search.assert_async().await;

    assert_eq!(
        app.vault.status(USER_ID, GOOGLE_SUB).unwrap(),
        Some(CredentialStatus::NeedsReauth)
    );
    // The flagged credential no longer resolves
    assert!(app.vault.load_refresh_token(USER_ID).is_err());
}

#[tokio::test]
async fn test_sync_upstream_failure_is_bad_gateway() {
    let mut app = TestApp::new().await;
    let token = app.session();
    app.seed_credential();
    app.accounts
        .link_accounts(USER_ID, GOOGLE, GOOGLE_SUB, &["1234567890".to_string()])
        .unwrap();

    let _refresh = app.mock_refresh_exchange().await;
    let search = app
        .server
        .mock("POST", "/v21/customers/1234567890/googleAds:searchStream")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let (status, _) = app
        .post(
            "/integrations/google/sync",
            Some(&token),
            json!({"customer_id": "1234567890", "date": "2025-07-24"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    search.assert_async().await;
}
