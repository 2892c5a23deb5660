//! Repository for token reservations and refunds on `subscriptions`.
//!
//! Reservation is a single conditional decrement, not a read-then-write
//! pair, so concurrent generations by the same user can never drive the
//! balance negative.

use atelier_core::types::DbId;
use sqlx::PgPool;

use crate::models::subscription::Subscription;
use crate::repositories::GenerationRepo;

/// Provides atomic token accounting operations.
pub struct LedgerRepo;

impl LedgerRepo {
    /// Fetch a user's subscription row.
    pub async fn find_by_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            "SELECT user_id, plan, tokens_remaining, tokens_total, created_at, updated_at \
             FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    /// Atomically reserve `amount` tokens if the balance allows it.
    ///
    /// Returns `true` when the decrement applied, `false` when the user
    /// has insufficient tokens (or no subscription row). The balance
    /// check and the write are one statement, so there is no window for
    /// a concurrent reservation to race past the check.
    pub async fn reserve(pool: &PgPool, user_id: DbId, amount: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE subscriptions \
             SET tokens_remaining = tokens_remaining - $2, updated_at = NOW() \
             WHERE user_id = $1 AND tokens_remaining >= $2",
        )
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Restore exactly `amount` tokens to a user's balance.
    ///
    /// Callers must go through [`refund_generation`](Self::refund_generation)
    /// on failure paths so the per-generation refund guard applies.
    pub async fn credit(pool: &PgPool, user_id: DbId, amount: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE subscriptions \
             SET tokens_remaining = tokens_remaining + $2, updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(amount)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Refund the exact amount reserved for one generation, at most once.
    ///
    /// The refund guard lives on the generation row (`refunded` flag);
    /// if another failure path already claimed it, this is a no-op and
    /// returns `false`. Only a claimed guard credits the balance, so
    /// triggering the failure path twice never double-refunds.
    pub async fn refund_generation(
        pool: &PgPool,
        generation_id: DbId,
        user_id: DbId,
        amount: i64,
    ) -> Result<bool, sqlx::Error> {
        if !GenerationRepo::mark_refunded(pool, generation_id).await? {
            return Ok(false);
        }
        Self::credit(pool, user_id, amount).await?;

        tracing::info!(
            generation_id,
            user_id,
            amount,
            "Refunded reserved tokens",
        );
        Ok(true)
    }
}
