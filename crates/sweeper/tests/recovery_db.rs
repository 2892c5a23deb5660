//! Database-backed recovery tests.
//!
//! Each test stages a stuck record the way production gets them (real
//! rows, backdated `updated_at`), runs a sweep, and checks the row,
//! the ledger, and the sweep counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use atelier_core::lifecycle::GenerationStatus;
use atelier_core::types::DbId;
use atelier_db::models::generation::{Generation, NewGeneration};
use atelier_db::repositories::{GenerationRepo, LedgerRepo, ProviderTaskRepo};
use atelier_providers::{
    DispatchOutcome, DispatchRequest, Provider, ProviderError, ProviderRegistry, SyncArtifact,
    TaskOutput, TaskPoll,
};
use atelier_storage::{MemoryStorage, Uploader};
use atelier_sweeper::{run_sweep, SweeperDeps};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Async provider whose task reports done with one output URL. Counts
/// submit calls so tests can assert nothing was re-dispatched.
struct KinemaDone {
    output_url: String,
    submit_calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Provider for KinemaDone {
    fn name(&self) -> &'static str {
        "kinema"
    }

    async fn submit(&self, _request: &DispatchRequest) -> Result<DispatchOutcome, ProviderError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::NotImplemented("kinema".to_string()))
    }

    async fn poll(&self, _task_id: &str) -> Result<TaskPoll, ProviderError> {
        Ok(TaskPoll::Succeeded {
            outputs: vec![TaskOutput {
                url: self.output_url.clone(),
                extension: "mp4".to_string(),
            }],
        })
    }
}

/// Sync provider answering every dispatch with a small PNG.
struct BrushworkOk;

#[async_trait::async_trait]
impl Provider for BrushworkOk {
    fn name(&self) -> &'static str {
        "brushwork"
    }

    async fn submit(&self, _request: &DispatchRequest) -> Result<DispatchOutcome, ProviderError> {
        Ok(DispatchOutcome::Sync(SyncArtifact {
            bytes: vec![0x89, 0x50, 0x4E, 0x47],
            extension: "png".to_string(),
            metadata: serde_json::json!({}),
        }))
    }

    async fn poll(&self, _task_id: &str) -> Result<TaskPoll, ProviderError> {
        Err(ProviderError::NotImplemented("brushwork".to_string()))
    }
}

/// Serve `bytes` once over a local HTTP listener, returning its URL.
async fn serve_output(bytes: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener has an address");
    let app = axum::Router::new().route(
        "/out.mp4",
        axum::routing::get(move || async move { bytes }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server should run");
    });
    format!("http://{addr}/out.mp4")
}

fn deps(pool: PgPool, registry: ProviderRegistry, storage: Arc<MemoryStorage>) -> SweeperDeps {
    SweeperDeps {
        pool,
        registry: Arc::new(registry),
        uploader: Uploader::new(storage),
        download_client: reqwest::Client::new(),
        staleness: Duration::from_secs(300),
        dispatch_timeout: Duration::from_secs(5),
    }
}

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

/// Insert a generation with its credits already reserved, mirroring the
/// submit flow.
async fn seed_reserved_generation(
    pool: &PgPool,
    user_id: DbId,
    model_id: &str,
    content_type: &str,
    token_cost: i64,
) -> Generation {
    assert!(
        LedgerRepo::reserve(pool, user_id, token_cost)
            .await
            .expect("reserve should succeed"),
        "seed balance must cover the reservation"
    );
    let input = NewGeneration {
        model_id: model_id.to_string(),
        content_type: content_type.to_string(),
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

/// Push the record's `updated_at` past the staleness threshold.
async fn backdate(pool: &PgPool, id: DbId) {
    sqlx::query("UPDATE generations SET updated_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .expect("backdate should succeed");
}

async fn fetch(pool: &PgPool, id: DbId) -> Generation {
    GenerationRepo::find_by_id(pool, id)
        .await
        .expect("lookup should succeed")
        .expect("record should exist")
}

async fn balance(pool: &PgPool, user_id: DbId) -> i64 {
    LedgerRepo::find_by_user(pool, user_id)
        .await
        .expect("lookup should succeed")
        .expect("subscription row should exist")
        .tokens_remaining
}

// ---------------------------------------------------------------------------
// Recovery paths
// ---------------------------------------------------------------------------

/// A processing record whose external task finished: the sweep downloads
/// the output, uploads it, and completes the record without ever
/// re-dispatching, and without touching the ledger.
#[sqlx::test(migrations = "../db/migrations")]
async fn finished_external_task_is_completed_without_redispatch(pool: PgPool) {
    seed_subscription(&pool, 7, 1000).await;
    let record = seed_reserved_generation(&pool, 7, "video-render", "video", 100).await;
    assert!(
        GenerationRepo::mark_processing(&pool, record.id, &serde_json::json!({}))
            .await
            .unwrap()
    );
    ProviderTaskRepo::create(&pool, record.id, "kinema", "task-1", None)
        .await
        .unwrap();
    backdate(&pool, record.id).await;

    let output_url = serve_output(b"rendered frames".to_vec()).await;
    let provider = Arc::new(KinemaDone {
        output_url,
        submit_calls: AtomicUsize::new(0),
    });
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let storage = Arc::new(MemoryStorage::new());
    let deps = deps(pool.clone(), registry, storage.clone());

    let outcome = run_sweep(&deps, None).await.unwrap();
    assert_eq!(outcome.examined, 1);
    assert_eq!(outcome.completed, 1);

    let row = fetch(&pool, record.id).await;
    assert_eq!(row.status_id, GenerationStatus::Completed.id());
    let url = row.output_url.as_deref().expect("output_url must be set");
    assert!(url.starts_with("memory://"));
    assert!(!row.refunded);
    assert_eq!(storage.object_count(), 1);
    assert_eq!(provider.submit_calls.load(Ordering::SeqCst), 0);
    assert_eq!(balance(&pool, 7).await, 900);
}

/// Crash window between upload and completion write: the row already
/// carries its stored output, so the sweep advances it directly instead
/// of failing it and orphaning the object.
#[sqlx::test(migrations = "../db/migrations")]
async fn stored_output_advances_record_to_completed(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    let record = seed_reserved_generation(&pool, 7, "image-standard", "image", 10).await;
    assert!(
        GenerationRepo::mark_processing(&pool, record.id, &serde_json::json!({}))
            .await
            .unwrap()
    );
    assert!(GenerationRepo::record_uploaded(
        &pool,
        record.id,
        "memory://7/2026-08-27/out.png",
        Some("7/2026-08-27/out.png"),
        None,
    )
    .await
    .unwrap());
    backdate(&pool, record.id).await;

    let deps = deps(
        pool.clone(),
        ProviderRegistry::new(),
        Arc::new(MemoryStorage::new()),
    );
    let outcome = run_sweep(&deps, None).await.unwrap();
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.failed, 0);

    let row = fetch(&pool, record.id).await;
    assert_eq!(row.status_id, GenerationStatus::Completed.id());
    assert_eq!(row.output_url.as_deref(), Some("memory://7/2026-08-27/out.png"));
    assert!(!row.refunded);
    assert_eq!(balance(&pool, 7).await, 90);
}

/// An undispatched pending record is re-invoked from the beginning; a
/// sync outcome completes the whole lifecycle in the sweep.
#[sqlx::test(migrations = "../db/migrations")]
async fn stale_pending_record_is_reinvoked(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    let record = seed_reserved_generation(&pool, 7, "image-standard", "image", 10).await;
    backdate(&pool, record.id).await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(BrushworkOk));
    let storage = Arc::new(MemoryStorage::new());
    let deps = deps(pool.clone(), registry, storage.clone());

    let outcome = run_sweep(&deps, None).await.unwrap();
    assert_eq!(outcome.reinvoked, 1);

    let row = fetch(&pool, record.id).await;
    assert_eq!(row.status_id, GenerationStatus::Completed.id());
    assert!(row.output_url.is_some());
    assert_eq!(storage.object_count(), 1);
    assert_eq!(balance(&pool, 7).await, 90);
}

/// Unrecoverable processing record: force-fail with a refund on the
/// first sweep, and a second sweep over the same data changes nothing.
#[sqlx::test(migrations = "../db/migrations")]
async fn second_sweep_over_recovered_data_is_a_noop(pool: PgPool) {
    seed_subscription(&pool, 7, 100).await;
    let record = seed_reserved_generation(&pool, 7, "image-standard", "image", 10).await;
    assert!(
        GenerationRepo::mark_processing(&pool, record.id, &serde_json::json!({}))
            .await
            .unwrap()
    );
    backdate(&pool, record.id).await;

    let deps = deps(
        pool.clone(),
        ProviderRegistry::new(),
        Arc::new(MemoryStorage::new()),
    );

    let first = run_sweep(&deps, None).await.unwrap();
    assert_eq!(first.examined, 1);
    assert_eq!(first.failed, 1);

    let after_first = fetch(&pool, record.id).await;
    assert_eq!(after_first.status_id, GenerationStatus::Failed.id());
    assert!(after_first.refunded);
    assert_eq!(balance(&pool, 7).await, 100);

    let second = run_sweep(&deps, None).await.unwrap();
    assert_eq!(second.examined, 0);
    assert_eq!(second.completed, 0);
    assert_eq!(second.failed, 0);

    let after_second = fetch(&pool, record.id).await;
    assert_eq!(after_second.status_id, after_first.status_id);
    assert_eq!(after_second.updated_at, after_first.updated_at);
    assert!(after_second.refunded);
    assert_eq!(balance(&pool, 7).await, 100);
}
