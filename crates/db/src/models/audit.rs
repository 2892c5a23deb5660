//! Audit log entry model.

use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `audit_log` table.
///
/// One entry per recovery action, dispatch failure, and refund, keyed
/// by generation id for diagnosis.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEntry {
    pub id: DbId,
    pub generation_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub action: String,
    pub detail: serde_json::Value,
    pub created_at: Timestamp,
}
