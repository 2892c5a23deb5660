//! Generation entity model and DTOs.

use atelier_core::lifecycle::StatusId;
use atelier_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `generations` table — one persisted state machine
/// instance tracking a generation from submission to a terminal state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Generation {
    pub id: DbId,
    pub user_id: DbId,
    pub model_id: String,
    pub content_type: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub params: serde_json::Value,
    pub token_cost: i64,
    pub status_id: StatusId,
    pub output_url: Option<String>,
    pub storage_path: Option<String>,
    /// All output variants for batch generations; `output_url` is the
    /// selected default (index 0), the rest stay available here.
    pub output_variants: Option<serde_json::Value>,
    pub provider_request: Option<serde_json::Value>,
    pub provider_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub refunded: bool,
    pub retry_of_generation_id: Option<DbId>,
    /// Set when the provider call begins, separating setup latency from
    /// provider latency.
    pub api_call_started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Validated insert payload for a new generation row.
///
/// Built by the service layer after model lookup, prompt/parameter
/// validation, and cost computation succeed.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub model_id: String,
    pub content_type: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub params: serde_json::Value,
    pub token_cost: i64,
    pub retry_of_generation_id: Option<DbId>,
}

/// Request body for `POST /api/v1/generations`.
#[derive(Debug, Deserialize)]
pub struct SubmitGeneration {
    pub model_id: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Query parameters for `GET /api/v1/generations`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerationListQuery {
    /// Filter by status id (e.g. 2 = processing, 4 = failed).
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
