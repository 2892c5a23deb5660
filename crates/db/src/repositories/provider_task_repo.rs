//! Repository for the `provider_tasks` table.

use atelier_core::types::DbId;
use sqlx::PgPool;

use crate::models::provider_task::ProviderTask;

const COLUMNS: &str = "id, generation_id, provider, task_id, poll_interval_secs, created_at";

/// Provides lookups for async provider task references.
pub struct ProviderTaskRepo;

impl ProviderTaskRepo {
    /// Record the task id an async provider returned for a generation.
    pub async fn create(
        pool: &PgPool,
        generation_id: DbId,
        provider: &str,
        task_id: &str,
        poll_interval_secs: Option<i64>,
    ) -> Result<ProviderTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO provider_tasks (generation_id, provider, task_id, poll_interval_secs) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProviderTask>(&query)
            .bind(generation_id)
            .bind(provider)
            .bind(task_id)
            .bind(poll_interval_secs)
            .fetch_one(pool)
            .await
    }

    /// Find the task reference owned by a generation, if any.
    pub async fn find_by_generation(
        pool: &PgPool,
        generation_id: DbId,
    ) -> Result<Option<ProviderTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM provider_tasks WHERE generation_id = $1");
        sqlx::query_as::<_, ProviderTask>(&query)
            .bind(generation_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a task reference by its provider-scoped task id.
    pub async fn find_by_task_id(
        pool: &PgPool,
        provider: &str,
        task_id: &str,
    ) -> Result<Option<ProviderTask>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM provider_tasks WHERE provider = $1 AND task_id = $2");
        sqlx::query_as::<_, ProviderTask>(&query)
            .bind(provider)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }
}
