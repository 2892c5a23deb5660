//! Repository for the `audit_log` table.
//!
//! Every recovery action, dispatch failure, and refund writes one row
//! here, keyed by generation id.

use atelier_core::types::DbId;
use sqlx::PgPool;

use crate::models::audit::AuditEntry;

const COLUMNS: &str = "id, generation_id, user_id, action, detail, created_at";

/// Provides append and lookup operations for audit entries.
pub struct AuditRepo;

impl AuditRepo {
    /// Append an audit entry.
    pub async fn record(
        pool: &PgPool,
        generation_id: Option<DbId>,
        user_id: Option<DbId>,
        action: &str,
        detail: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_log (generation_id, user_id, action, detail) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(generation_id)
        .bind(user_id)
        .bind(action)
        .bind(detail)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// List audit entries for one generation, oldest first.
    pub async fn list_for_generation(
        pool: &PgPool,
        generation_id: DbId,
    ) -> Result<Vec<AuditEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_log \
             WHERE generation_id = $1 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, AuditEntry>(&query)
            .bind(generation_id)
            .fetch_all(pool)
            .await
    }
}
