//! Standalone sweeper process: runs the stuck-job recovery sweep on a
//! fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atelier_providers::ProviderRegistry;
use atelier_storage::{S3Config, S3Storage, Uploader};
use atelier_sweeper::{run_sweep, SweeperDeps};

/// Default staleness threshold in seconds; also the sweep cadence.
const DEFAULT_STALENESS_SECS: u64 = 300;

/// Default deadline for a re-invoked dispatch call, in seconds.
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 120;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier_sweeper=debug,atelier_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::error!("DATABASE_URL is not set");
            std::process::exit(1);
        }
    };

    let pool = match atelier_db::create_pool(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            std::process::exit(1);
        }
    };

    let storage = match S3Storage::connect(s3_config_from_env()).await {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(error = %e, "failed to configure object storage");
            std::process::exit(1);
        }
    };

    // Vendor integrations are registered here as they come online;
    // until then every dispatch resolves to "not implemented" and the
    // affected record is failed and refunded instead of wedging.
    let registry = Arc::new(ProviderRegistry::new());

    let staleness = Duration::from_secs(env_u64("SWEEP_STALENESS_SECS", DEFAULT_STALENESS_SECS));
    let deps = SweeperDeps {
        pool,
        registry,
        uploader: Uploader::new(Arc::new(storage)),
        download_client: reqwest::Client::new(),
        staleness,
        dispatch_timeout: Duration::from_secs(env_u64(
            "DISPATCH_TIMEOUT_SECS",
            DEFAULT_DISPATCH_TIMEOUT_SECS,
        )),
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    tracing::info!(
        staleness_secs = staleness.as_secs(),
        "sweeper started"
    );

    // Sweep cadence equals the staleness threshold: anything that went
    // stale since the last pass is picked up on the next one.
    let mut interval = tokio::time::interval(staleness);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = run_sweep(&deps, None).await {
                    tracing::error!(error = %e, "sweep scan failed");
                }
            }
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
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
