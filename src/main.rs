use adsync::ads::{AdsClient, CostFeed, TokenSource};
use adsync::api::{create_router, IntegrationsAppState, MetricsAppState};
use adsync::config::{load_config, Secrets};
use adsync::credentials::{Encryptor, TokenVault};
use adsync::metrics::{MetricsAuthorizer, MetricsService};
use adsync::oauth::{run_state_cleanup, OAuthClient, OAuthStateStore, GOOGLE};
use adsync::store::{AccountsRepo, Database, MetricsRepo, OwnershipRepo, SessionStore};
use adsync::sync::{run_scheduled_sync, CostSyncService};
use adsync::validation::AmountValidator;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adsync=info".into()),
        )
        .init();

    info!("adsync starting...");

    let config_path = std::env::var("ADSYNC_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    let secrets = Secrets::from_env()?;

    // A bad key must stop startup, not fail individual requests later
    let encryptor =
        Encryptor::new(&secrets.encryption_key).context("Invalid ADSYNC_ENCRYPTION_KEY")?;

    if secrets.google_client_id.is_empty() || secrets.google_client_secret.is_empty() {
        warn!("ADSYNC_GOOGLE_CLIENT_ID / ADSYNC_GOOGLE_CLIENT_SECRET not set; connect will fail at the provider");
    }
    if secrets.google_developer_token.is_empty() {
        warn!("ADSYNC_GOOGLE_DEVELOPER_TOKEN not set; ads API calls will be rejected");
    }

    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.database.path,
        ads_base_url = %config.ads.base_url,
        scheduler_enabled = config.scheduler.enabled,
        "Configuration loaded"
    );

    let db = Arc::new(Database::open(&config.database.path).context("Failed to open database")?);
    info!("Database initialized");

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.ads.connect_timeout_seconds))
        .timeout(Duration::from_secs(config.ads.request_timeout_seconds))
        .build()
        .context("Failed to build HTTP client")?;

    let sessions = Arc::new(SessionStore::new(Arc::clone(&db)));
    let states = Arc::new(OAuthStateStore::new(
        Arc::clone(&db),
        chrono::Duration::seconds(config.oauth.state_ttl_seconds),
    ));
    let vault = Arc::new(TokenVault::new(Arc::clone(&db), encryptor));
    let oauth = OAuthClient::new(http.clone(), config.provider_config(&secrets));
    let tokens = Arc::new(TokenSource::new(Arc::clone(&vault), oauth.clone()));
    let ads = Arc::new(AdsClient::new(
        http,
        config.ads_client_config(&secrets),
        tokens,
    ));

    let accounts = Arc::new(AccountsRepo::new(Arc::clone(&db)));
    let authorizer = Arc::new(MetricsAuthorizer::new(Arc::new(OwnershipRepo::new(
        Arc::clone(&db),
    ))));
    let feed: Arc<dyn CostFeed> = ads.clone();
    let sync = Arc::new(CostSyncService::new(
        feed,
        Arc::clone(&accounts),
        Arc::clone(&authorizer),
        AmountValidator::default(),
        GOOGLE,
    ));
    let metrics = Arc::new(MetricsService::new(
        authorizer,
        Arc::new(MetricsRepo::new(Arc::clone(&db))),
    ));

    let shutdown = CancellationToken::new();

    let cleanup_handle = tokio::spawn(run_state_cleanup(
        Arc::clone(&states),
        Duration::from_secs(config.oauth.state_purge_interval_seconds),
        shutdown.child_token(),
    ));
    info!("OAuth state cleanup task started");

    let scheduler_handle = if config.scheduler.enabled {
        info!(
            interval_seconds = config.scheduler.interval_seconds,
            lookback_days = config.scheduler.lookback_days,
            "Scheduled cost sync started"
        );
        Some(tokio::spawn(run_scheduled_sync(
            Arc::clone(&sync),
            Duration::from_secs(config.scheduler.interval_seconds),
            config.scheduler.lookback_days,
            shutdown.child_token(),
        )))
    } else {
        None
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = create_router(
        IntegrationsAppState {
            sessions: Arc::clone(&sessions),
            states,
            vault,
            oauth,
            ads,
            accounts,
            sync,
            shutdown: shutdown.clone(),
        },
        MetricsAppState { sessions, metrics },
    )
    .layer(cors);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP API listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for ctrl_c signal");
                    }
                    info!("Shutdown signal received");
                }
                _ = server_shutdown.cancelled() => {}
            }
            server_shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;

    // Graceful shutdown
    shutdown.cancel();
    if let Err(e) = cleanup_handle.await {
        warn!(error = %e, "State cleanup task ended abnormally");
    }
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
    info!("adsync stopped");

    Ok(())
}
