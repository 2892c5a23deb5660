//! Subscription / token balance model.

use atelier_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `subscriptions` table.
///
/// `tokens_remaining` never goes negative: reservations are a single
/// conditional decrement at the storage layer.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subscription {
    pub user_id: DbId,
    pub plan: String,
    pub tokens_remaining: i64,
    pub tokens_total: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
