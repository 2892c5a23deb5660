use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use atelier_core::breaker::{CircuitBreaker, InFlightLimiter};
use atelier_providers::ProviderRegistry;
use atelier_storage::Uploader;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: atelier_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Named provider integrations.
    pub registry: Arc<ProviderRegistry>,
    /// Output uploader over the configured object store.
    pub uploader: Uploader,
    /// Process-local dispatch circuit breaker.
    pub breaker: Arc<CircuitBreaker>,
    /// Process-local concurrent-dispatch limiter.
    pub limiter: Arc<InFlightLimiter>,
    /// HTTP client for downloading provider-hosted output.
    pub download_client: reqwest::Client,
    /// Cancelled at shutdown; detached poll loops observe it.
    pub shutdown: CancellationToken,
}
