use std::time::Duration;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,
    /// Deadline for one provider dispatch call (default: `120`).
    pub dispatch_timeout_secs: u64,
    /// Cadence for async task status polls (default: `3`). Providers
    /// may override per task.
    pub poll_interval_secs: u64,
    /// Overall deadline for one async task's poll loop (default: `600`).
    pub poll_deadline_secs: u64,
    /// In-flight record age after which the sweeper intervenes
    /// (default: `300`).
    pub staleness_secs: u64,
    /// Consecutive dispatch failures before the breaker opens
    /// (default: `5`).
    pub breaker_failure_threshold: u32,
    /// Breaker cooldown in seconds (default: `60`).
    pub breaker_cooldown_secs: u64,
    /// Maximum concurrent provider dispatches (default: `32`).
    pub max_concurrent_dispatches: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `HOST`                      | `0.0.0.0`               |
    /// | `PORT`                      | `3000`                  |
    /// | `CORS_ORIGINS`              | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                    |
    /// | `DISPATCH_TIMEOUT_SECS`     | `120`                   |
    /// | `POLL_INTERVAL_SECS`        | `3`                     |
    /// | `POLL_DEADLINE_SECS`        | `600`                   |
    /// | `SWEEP_STALENESS_SECS`      | `300`                   |
    /// | `BREAKER_FAILURE_THRESHOLD` | `5`                     |
    /// | `BREAKER_COOLDOWN_SECS`     | `60`                    |
    /// | `MAX_CONCURRENT_DISPATCHES` | `32`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", 30),
            jwt: JwtConfig::from_env(),
            dispatch_timeout_secs: env_u64("DISPATCH_TIMEOUT_SECS", 120),
            poll_interval_secs: env_u64("POLL_INTERVAL_SECS", 3),
            poll_deadline_secs: env_u64("POLL_DEADLINE_SECS", 600),
            staleness_secs: env_u64("SWEEP_STALENESS_SECS", 300),
            breaker_failure_threshold: env_u64("BREAKER_FAILURE_THRESHOLD", 5) as u32,
            breaker_cooldown_secs: env_u64("BREAKER_COOLDOWN_SECS", 60),
            max_concurrent_dispatches: env_u64("MAX_CONCURRENT_DISPATCHES", 32) as usize,
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_deadline(&self) -> Duration {
        Duration::from_secs(self.poll_deadline_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid u64"))
}
