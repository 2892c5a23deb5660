//! Database-backed tests for token accounting and the refund guard.

use sqlx::PgPool;

use atelier_core::lifecycle::GenerationStatus;
use atelier_core::types::DbId;
use atelier_db::models::generation::{Generation, NewGeneration};
use atelier_db::repositories::{GenerationRepo, LedgerRepo};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_subscription(pool: &PgPool, user_id: DbId, tokens: i64) {
    sqlx::query(
        "INSERT INTO subscriptions (user_id, plan, tokens_remaining, tokens_total) \
         VALUES ($1, 'pro', $2, $2)",
    )
    .bind(user_id)
    .bind(tokens)
    .execute(pool)
    .await
    .expect("subscription seed should succeed");
}

async fn seed_generation(pool: &PgPool, user_id: DbId, token_cost: i64) -> Generation {
    let input = NewGeneration {
        model_id: "image-standard".to_string(),
        content_type: "image".to_string(),
        prompt: "a quiet harbor at dawn".to_string(),
        enhanced_prompt: None,
        params: serde_json::json!({}),
        token_cost,
        retry_of_generation_id: None,
    };
    GenerationRepo::submit(pool, user_id, &input)
        .await
        .expect("generation insert should succeed")
}

async fn balance(pool: &PgPool, user_id: DbId) -> i64 {
    LedgerRepo::find_by_user(pool, user_id)
        .await
        .expect("lookup should succeed")
        .expect("subscription row should exist")
        .tokens_remaining
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// Reservation decrements the balance when it covers the amount.
#[sqlx::test(migrations = "./migrations")]
async fn reserve_decrements_when_balance_allows(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;

    let reserved = LedgerRepo::reserve(&pool, 7, 10).await.unwrap();

    assert!(reserved);
    assert_eq!(balance(&pool, 7).await, 90);
}

/// An insufficient balance rejects the reservation and changes nothing.
#[sqlx::test(migrations = "./migrations")]
async fn reserve_rejects_insufficient_balance(pool: PgPool) {
    seed_subscription(&pool, 7, 5).await;

    let reserved = LedgerRepo::reserve(&pool, 7, 10).await.unwrap();

    assert!(!reserved);
    assert_eq!(balance(&pool, 7).await, 5);
}

/// A user without a subscription row cannot reserve.
#[sqlx::test(migrations = "./migrations")]
async fn reserve_without_subscription_is_rejected(pool: PgPool) {
    let reserved = LedgerRepo::reserve(&pool, 999, 1).await.unwrap();
    assert!(!reserved);
}

// ---------------------------------------------------------------------------
// Refund guard
// ---------------------------------------------------------------------------

/// The first refund credits the reserved amount back; a second attempt
/// on the same generation is a no-op. Triggering the failure path twice
/// therefore leaves the user with exactly their original balance.
#[sqlx::test(migrations = "./migrations")]
async fn refund_credits_back_exactly_once(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    assert!(LedgerRepo::reserve(&pool, 7, 10).await.unwrap());
    let record = seed_generation(&pool, 7, 10).await;

    let first = LedgerRepo::refund_generation(&pool, record.id, 7, 10)
        .await
        .unwrap();
    let second = LedgerRepo::refund_generation(&pool, record.id, 7, 10)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(balance(&pool, 7).await, 100);

    let row = GenerationRepo::find_by_id(&pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.refunded);
}

// ---------------------------------------------------------------------------
// Upload evidence
// ---------------------------------------------------------------------------

/// The stored output location lands on the row before the completion
/// write, so a crash between the two leaves an in-flight record that
/// carries its URL.
#[sqlx::test(migrations = "./migrations")]
async fn record_uploaded_persists_output_while_in_flight(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    let record = seed_generation(&pool, 7, 10).await;
    assert!(
        GenerationRepo::mark_processing(&pool, record.id, &serde_json::json!({}))
            .await
            .unwrap()
    );

    let written = GenerationRepo::record_uploaded(
        &pool,
        record.id,
        "https://cdn.example.com/7/2026-08-27/1.png",
        Some("7/2026-08-27/1.png"),
        None,
    )
    .await
    .unwrap();
    assert!(written);

    let row = GenerationRepo::find_by_id(&pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status_id, GenerationStatus::Processing.id());
    assert_eq!(
        row.output_url.as_deref(),
        Some("https://cdn.example.com/7/2026-08-27/1.png")
    );
    assert_eq!(row.storage_path.as_deref(), Some("7/2026-08-27/1.png"));
}

/// A terminal record rejects the upload-evidence write.
#[sqlx::test(migrations = "./migrations")]
async fn record_uploaded_is_a_noop_on_terminal_records(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    let record = seed_generation(&pool, 7, 10).await;
    assert!(GenerationRepo::cancel(&pool, record.id).await.unwrap());

    let written = GenerationRepo::record_uploaded(
        &pool,
        record.id,
        "https://cdn.example.com/late.png",
        None,
        None,
    )
    .await
    .unwrap();
    assert!(!written);

    let row = GenerationRepo::find_by_id(&pool, record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status_id, GenerationStatus::Cancelled.id());
    assert!(row.output_url.is_none());
}
