//! Provider task reference model.

use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `provider_tasks` table.
///
/// Owned by exactly one generation; records the opaque task id an async
/// provider returned so polling and sweeper recovery can look the job
/// up later.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderTask {
    pub id: DbId,
    pub generation_id: DbId,
    pub provider: String,
    pub task_id: String,
    /// Per-provider poll cadence override in seconds, when the provider
    /// is known to be slower than the global default.
    pub poll_interval_secs: Option<i64>,
    pub created_at: Timestamp,
}
