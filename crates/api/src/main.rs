use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_api::config::ServerConfig;
use atelier_api::router::build_app_router;
use atelier_api::state::AppState;
use atelier_core::breaker::{BreakerConfig, CircuitBreaker, InFlightLimiter};
use atelier_providers::ProviderRegistry;
use atelier_storage::{S3Config, S3Storage, Uploader};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = atelier_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    atelier_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    atelier_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Object storage ---
    let storage = S3Storage::connect(s3_config_from_env())
        .await
        .expect("Failed to configure object storage");
    let uploader = Uploader::new(Arc::new(storage));
    tracing::info!("Object storage configured");

    // --- Providers ---
    // Vendor integrations are registered here as they come online;
    // models routed to an unregistered provider fail with a descriptive
    // error and a refund instead of wedging.
    let registry = Arc::new(ProviderRegistry::new());

    // --- Capacity controls ---
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        cooldown: Duration::from_secs(config.breaker_cooldown_secs),
    }));
    let limiter = Arc::new(InFlightLimiter::new(config.max_concurrent_dispatches));

    // --- Shutdown token for detached poll loops ---
    let shutdown = CancellationToken::new();

    // --- App state ---
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
        uploader: uploader.clone(),
        breaker,
        limiter,
        download_client: reqwest::Client::new(),
        shutdown: shutdown.clone(),
    };

    // --- Background sweeper ---
    let sweeper_deps = atelier_sweeper::SweeperDeps {
        pool,
        registry,
        uploader,
        download_client: state.download_client.clone(),
        staleness: state.config.staleness(),
        dispatch_timeout: state.config.dispatch_timeout(),
    };
    let sweeper_cancel = shutdown.clone();
    let sweeper_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweeper_deps.staleness);
        loop {
            tokio::select! {
                _ = sweeper_cancel.cancelled() => {
                    tracing::info!("Background sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = atelier_sweeper::run_sweep(&sweeper_deps, None).await {
                        tracing::error!(error = %e, "Background sweep failed");
                    }
                }
            }
        }
    });
    tracing::info!("Background sweeper started");

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop detached poll loops and the background sweeper. In-flight
    // async tasks are re-observed by the sweeper on next startup.
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweeper_handle).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

fn s3_config_from_env() -> S3Config {
    S3Config {
        endpoint_url: std::env::var("S3_ENDPOINT_URL").unwrap_or_default(),
        region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        access_key: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
        secret_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
        bucket: std::env::var("S3_BUCKET").unwrap_or_default(),
        public_base_url: std::env::var("S3_PUBLIC_BASE_URL").unwrap_or_default(),
    }
}
