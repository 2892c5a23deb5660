//! Domain error type shared by all crates.

use crate::types::DbId;

/// Domain-level error for generation lifecycle operations.
///
/// HTTP mapping lives in `atelier-api`; this enum stays transport-agnostic.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Input failed validation before any side effect occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{entity} with id {id} not found")]
    NotFound {
        /// Entity kind, e.g. "Generation".
        entity: &'static str,
        /// The id that was looked up.
        id: DbId,
    },

    /// The operation conflicts with current state (e.g. already terminal).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The user does not have enough tokens for the requested generation.
    #[error("Insufficient tokens: need {required}, have {available}")]
    InsufficientTokens {
        /// Tokens required for this generation.
        required: i64,
        /// Tokens currently remaining.
        available: i64,
    },

    /// Rejected by the circuit breaker or concurrency limiter.
    /// No credits are reserved for capacity-rejected requests.
    #[error("Temporarily unavailable: {reason}")]
    Capacity {
        /// Human-readable rejection reason.
        reason: String,
        /// Hint for when the client may retry, if known.
        retry_after_secs: Option<u64>,
    },

    /// An internal invariant was violated or a dependency failed.
    #[error("Internal error: {0}")]
    Internal(String),
}
