use std::sync::Arc;

use reelfetch::{
    api::{self, ApiError, AppState},
    cache::{self, CacheStore, MemoryCache, NoopCache},
    config::{CacheBackend, Config},
    extractors::ExtractorRegistry,
    identity::IdentityRotator,
    service::{self, Service},
};
use tokio::{net::TcpListener, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "reelfetch=info,tower_http=info";

#[tokio::main]
async fn main() {
    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("Failed to load .env file: {error}");
    }

    init_tracing();

    if let Err(error) = run().await {
        tracing::error!(error = error.message(), "Server error");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let production = std::env::var("ENV")
        .is_ok_and(|value| value.trim().eq_ignore_ascii_case("production"));

    if production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.download_timeout_seconds))
        .build()
        .map_err(|error| ApiError::internal(format!("Failed to build HTTP client: {error}")))?;
    let proxy_client = service::proxy_client(&config)
        .map_err(|error| ApiError::internal(format!("Failed to build proxy client: {error}")))?;

    let cache: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Redis => cache::connect_or_noop(config.redis_url.as_deref()).await,
        CacheBackend::Memory => {
            info!("Using in-process cache");
            Arc::new(MemoryCache::new())
        }
        CacheBackend::None => {
            warn!("Caching disabled by CACHE_BACKEND");
            Arc::new(NoopCache)
        }
    };

    let identity = Arc::new(IdentityRotator::from_flags(
        config.rotate_user_agents,
        config.random_user_agent_order,
    ));
    info!(
        mode = ?identity.mode(),
        pool = identity.agents().len(),
        "User agent rotation configured"
    );
    let registry = ExtractorRegistry::from_config(&config, http_client, identity);
    let service = Service::from_config(&config, cache, registry, proxy_client);

    info!(
        strategy = ?config.extraction_strategy,
        max_concurrent_downloads = config.max_concurrent_downloads,
        ytdlp_path = %config.ytdlp_path,
        "Service configured"
    );

    let cors = api::build_cors_layer(&config.allowed_origins)?;
    let app = api::router(
        AppState {
            service: Arc::new(service),
        },
        cors,
    );

    let addr = config.bind_addr.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to bind {addr}: {error}")))?;

    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
