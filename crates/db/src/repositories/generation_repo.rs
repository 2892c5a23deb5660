//! Repository for the `generations` table.
//!
//! Every mutating transition carries a status guard in its WHERE clause
//! so a late duplicate update can never clobber a terminal result
//! ("no-op if already terminal" is a precondition for the dispatcher,
//! the poller, and the sweeper alike).

use atelier_core::lifecycle::{GenerationStatus, StatusId};
use atelier_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::generation::{Generation, GenerationListQuery, NewGeneration};

/// Column list for `generations` queries.
const COLUMNS: &str = "\
    id, user_id, model_id, content_type, prompt, enhanced_prompt, params, \
    token_cost, status_id, output_url, storage_path, output_variants, \
    provider_request, provider_response, error_message, refunded, \
    retry_of_generation_id, api_call_started_at, completed_at, \
    created_at, updated_at";

/// Maximum page size for listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD and transition operations for generation records.
pub struct GenerationRepo;

impl GenerationRepo {
    /// Insert a new pending generation. Credits must already be reserved.
    pub async fn submit(
        pool: &PgPool,
        user_id: DbId,
        input: &NewGeneration,
    ) -> Result<Generation, sqlx::Error> {
        let query = format!(
            "INSERT INTO generations \
                 (user_id, model_id, content_type, prompt, enhanced_prompt, \
                  params, token_cost, status_id, retry_of_generation_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Generation>(&query)
            .bind(user_id)
            .bind(&input.model_id)
            .bind(&input.content_type)
            .bind(&input.prompt)
            .bind(&input.enhanced_prompt)
            .bind(&input.params)
            .bind(input.token_cost)
            .bind(GenerationStatus::Pending.id())
            .bind(input.retry_of_generation_id)
            .fetch_one(pool)
            .await
    }

    /// Find a generation by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Generation>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generations WHERE id = $1");
        sqlx::query_as::<_, Generation>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Transition `pending -> processing`, recording the provider request
    /// snapshot and stamping `api_call_started_at`.
    ///
    /// Returns `false` if the record was not in `pending` (already
    /// dispatched elsewhere, cancelled, or terminal).
    pub async fn mark_processing(
        pool: &PgPool,
        id: DbId,
        provider_request: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations \
             SET status_id = $2, provider_request = $3, \
                 api_call_started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id = $4",
        )
        .bind(id)
        .bind(GenerationStatus::Processing.id())
        .bind(provider_request)
        .bind(GenerationStatus::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the provider's raw response snapshot for audit/debugging.
    pub async fn record_provider_response(
        pool: &PgPool,
        id: DbId,
        provider_response: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE generations SET provider_response = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(provider_response)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Persist the stored output location while the record is still in
    /// flight.
    ///
    /// Written between the storage upload and [`complete`](Self::complete)
    /// so a crash in that window leaves durable evidence on the row; the
    /// sweeper advances such a record to completed directly instead of
    /// failing it and orphaning the stored object.
    /// Returns `false` if the record was already terminal.
    pub async fn record_uploaded(
        pool: &PgPool,
        id: DbId,
        output_url: &str,
        storage_path: Option<&str>,
        output_variants: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations \
             SET output_url = $2, storage_path = $3, output_variants = $4, updated_at = NOW() \
             WHERE id = $1 AND status_id NOT IN ($5, $6, $7)",
        )
        .bind(id)
        .bind(output_url)
        .bind(storage_path)
        .bind(output_variants)
        .bind(GenerationStatus::Completed.id())
        .bind(GenerationStatus::Failed.id())
        .bind(GenerationStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition to `completed` with the stored output.
    ///
    /// The upload must already have succeeded and its location been
    /// written via [`record_uploaded`](Self::record_uploaded); the URL
    /// is still bound here, in the same statement as the status flip, so
    /// a reader can never observe `completed` with a missing URL.
    /// Returns `false` if the record was already terminal.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        output_url: &str,
        storage_path: Option<&str>,
        output_variants: Option<&serde_json::Value>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations \
             SET status_id = $2, output_url = $3, storage_path = $4, \
                 output_variants = $5, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id NOT IN ($6, $7, $8)",
        )
        .bind(id)
        .bind(GenerationStatus::Completed.id())
        .bind(output_url)
        .bind(storage_path)
        .bind(output_variants)
        .bind(GenerationStatus::Completed.id())
        .bind(GenerationStatus::Failed.id())
        .bind(GenerationStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition to `failed` with an error message.
    ///
    /// The caller is responsible for the paired refund and audit entry.
    /// Returns `false` if the record was already terminal.
    pub async fn fail(pool: &PgPool, id: DbId, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations \
             SET status_id = $2, error_message = $3, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id NOT IN ($4, $5, $6)",
        )
        .bind(id)
        .bind(GenerationStatus::Failed.id())
        .bind(error)
        .bind(GenerationStatus::Completed.id())
        .bind(GenerationStatus::Failed.id())
        .bind(GenerationStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel a generation if it is not already terminal.
    ///
    /// Returns `true` if the record was cancelled, `false` if it had
    /// already completed, failed, or been cancelled. Any poll loop
    /// observing the new status stops on its next check.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations \
             SET status_id = $2, completed_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id NOT IN ($3, $4, $5)",
        )
        .bind(id)
        .bind(GenerationStatus::Cancelled.id())
        .bind(GenerationStatus::Completed.id())
        .bind(GenerationStatus::Failed.id())
        .bind(GenerationStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark the generation as refunded, exactly once.
    ///
    /// Returns `true` only for the first call on a given record; the
    /// `refunded = FALSE` predicate makes a second failure-path
    /// invocation a no-op, which is what prevents double refunds.
    pub async fn mark_refunded(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generations SET refunded = TRUE, updated_at = NOW() \
             WHERE id = $1 AND refunded = FALSE",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Create a fresh pending generation from a failed one.
    ///
    /// History is never rewound in place: the new row points back via
    /// `retry_of_generation_id`. Credits for the new attempt must be
    /// reserved by the caller before this insert.
    pub async fn insert_retry(
        pool: &PgPool,
        original: &Generation,
    ) -> Result<Generation, sqlx::Error> {
        let input = NewGeneration {
            model_id: original.model_id.clone(),
            content_type: original.content_type.clone(),
            prompt: original.prompt.clone(),
            enhanced_prompt: original.enhanced_prompt.clone(),
            params: original.params.clone(),
            token_cost: original.token_cost,
            retry_of_generation_id: Some(original.id),
        };
        Self::submit(pool, original.user_id, &input).await
    }

    /// Range-scan for stale in-flight records: status in `statuses` and
    /// `updated_at` strictly older than `cutoff`.
    pub async fn find_stale(
        pool: &PgPool,
        statuses: &[StatusId],
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generations \
             WHERE status_id = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Generation>(&query)
            .bind(statuses)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// List generations for a specific user with optional status filter.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: DbId,
        params: &GenerationListQuery,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        Self::list(pool, Some(user_id), params).await
    }

    /// List all generations (admin view) with optional status filter.
    pub async fn list_all(
        pool: &PgPool,
        params: &GenerationListQuery,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        Self::list(pool, None, params).await
    }

    /// Shared listing query builder. When `user_id` is `Some`, filters to
    /// that user's generations; when `None`, returns all (admin view).
    async fn list(
        pool: &PgPool,
        user_id: Option<DbId>,
        params: &GenerationListQuery,
    ) -> Result<Vec<Generation>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);

        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if user_id.is_some() {
            conditions.push(format!("user_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.status_id.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM generations \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Generation>(&query);

        if let Some(uid) = user_id {
            q = q.bind(uid);
        }
        if let Some(sid) = params.status_id {
            q = q.bind(sid);
        }

        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }
}
