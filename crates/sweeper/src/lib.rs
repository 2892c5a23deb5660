//! Stuck-job recovery sweeper.
//!
//! Scans for generations that stopped progressing (in-flight status,
//! stale `updated_at`), asks the recovery decision table what to do
//! with each, and performs the chosen action: completing from provider
//! output, advancing records whose upload already landed, re-invoking
//! never-dispatched work, or force-failing with a refund.
//!
//! Each record is recovered inside its own error boundary and audited
//! individually; one bad record never aborts the scan. Terminal records
//! are skipped at the top of the loop, so running the sweep twice over
//! the same data is a no-op.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;

use atelier_core::cost::{find_model, ContentType};
use atelier_core::lifecycle::{FailureReason, GenerationStatus, StatusId, IN_FLIGHT_STATUSES};
use atelier_core::recovery::{self, ObservedTask, RecoveryAction};
use atelier_core::types::DbId;
use atelier_db::models::generation::Generation;
use atelier_db::repositories::{AuditRepo, GenerationRepo, LedgerRepo, ProviderTaskRepo};
use atelier_providers::http;
use atelier_providers::{DispatchOutcome, DispatchRequest, ProviderRegistry, TaskPoll};
use atelier_storage::Uploader;

/// How many stale records one sweep examines at most.
const SWEEP_BATCH_LIMIT: i64 = 100;

/// Everything a sweep needs to act on a record.
pub struct SweeperDeps {
    pub pool: PgPool,
    pub registry: Arc<ProviderRegistry>,
    pub uploader: Uploader,
    /// HTTP client for downloading provider-hosted output.
    pub download_client: reqwest::Client,
    /// Records older than this (strictly) are eligible.
    pub staleness: Duration,
    /// Deadline for a re-invoked dispatch call.
    pub dispatch_timeout: Duration,
}

/// Counters for one sweep run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepOutcome {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub reinvoked: usize,
    pub left_running: usize,
    pub skipped: usize,
    /// Records whose recovery itself errored; they stay eligible for
    /// the next sweep.
    pub errors: usize,
}

/// Run one sweep.
///
/// With `override_id` set, sweeps exactly that generation regardless of
/// staleness (the admin trigger); otherwise scans for stale in-flight
/// records.
pub async fn run_sweep(
    deps: &SweeperDeps,
    override_id: Option<DbId>,
) -> Result<SweepOutcome, sqlx::Error> {
    let records = match override_id {
        Some(id) => GenerationRepo::find_by_id(&deps.pool, id)
            .await?
            .into_iter()
            .collect(),
        None => {
            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(deps.staleness)
                    .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1000));
            let statuses: Vec<StatusId> = IN_FLIGHT_STATUSES.iter().map(|s| s.id()).collect();
            GenerationRepo::find_stale(&deps.pool, &statuses, cutoff, SWEEP_BATCH_LIMIT).await?
        }
    };

    let mut outcome = SweepOutcome::default();
    outcome.examined = records.len();

    for record in records {
        let id = record.id;
        match recover(deps, record).await {
            Ok(result) => match result {
                RecoveryResult::Completed => outcome.completed += 1,
                RecoveryResult::Failed => outcome.failed += 1,
                RecoveryResult::Reinvoked => outcome.reinvoked += 1,
                RecoveryResult::LeftRunning => outcome.left_running += 1,
                RecoveryResult::Skipped => outcome.skipped += 1,
            },
            Err(e) => {
                outcome.errors += 1;
                tracing::error!(generation_id = id, error = %e, "recovery failed, will retry next sweep");
            }
        }
    }

    tracing::info!(
        examined = outcome.examined,
        completed = outcome.completed,
        failed = outcome.failed,
        reinvoked = outcome.reinvoked,
        left_running = outcome.left_running,
        skipped = outcome.skipped,
        errors = outcome.errors,
        "sweep finished"
    );
    Ok(outcome)
}

enum RecoveryResult {
    Completed,
    Failed,
    Reinvoked,
    LeftRunning,
    Skipped,
}

/// Recover one record.
async fn recover(
    deps: &SweeperDeps,
    record: Generation,
) -> Result<RecoveryResult, RecoveryError> {
    let status = GenerationStatus::from_id(record.status_id)
        .ok_or_else(|| RecoveryError::Other(format!("unknown status id {}", record.status_id)))?;
    if status.is_terminal() {
        return Ok(RecoveryResult::Skipped);
    }

    // One status check of the record's provider task, if it has one.
    // A failed poll is indistinguishable from "still running": leave
    // the record for the next sweep rather than guessing.
    let task_ref = ProviderTaskRepo::find_by_generation(&deps.pool, record.id).await?;
    let (observed, outputs) = match &task_ref {
        Some(task) => match deps.registry.poll_task(&task.provider, &task.task_id).await {
            Ok(poll) => {
                let (observed, outputs) = observe(poll);
                (Some(observed), outputs)
            }
            Err(e) => {
                tracing::warn!(
                    generation_id = record.id,
                    task_id = %task.task_id,
                    error = %e,
                    "status poll failed during sweep"
                );
                return Ok(RecoveryResult::LeftRunning);
            }
        },
        None => (None, Vec::new()),
    };

    let elapsed = chrono::Utc::now()
        .signed_duration_since(record.updated_at)
        .to_std()
        .unwrap_or_default();
    let action = recovery::decide(
        status,
        observed.as_ref(),
        record.output_url.is_some(),
        elapsed,
    );
    tracing::info!(
        generation_id = record.id,
        status = status.as_str(),
        action = ?action,
        "recovery decision"
    );

    match action {
        RecoveryAction::Skip => Ok(RecoveryResult::Skipped),
        RecoveryAction::LeaveUntouched => Ok(RecoveryResult::LeftRunning),

        RecoveryAction::CompleteFromOutput { output_url } => {
            complete_from_output(deps, &record, &output_url, &outputs).await
        }

        RecoveryAction::MarkCompleted => {
            // output_url is present per the decision table.
            let url = record.output_url.clone().unwrap_or_default();
            GenerationRepo::complete(
                &deps.pool,
                record.id,
                &url,
                record.storage_path.as_deref(),
                record.output_variants.as_ref(),
            )
            .await?;
            audit(deps, &record, "sweep_completed", serde_json::json!({
                "detail": "output already stored, status advanced",
            }))
            .await;
            Ok(RecoveryResult::Completed)
        }

        RecoveryAction::Fail { reason } => {
            fail_and_refund(deps, &record, FailureReason::ProviderError, &reason).await?;
            Ok(RecoveryResult::Failed)
        }

        RecoveryAction::ForceFail { diagnostic } => {
            fail_and_refund(deps, &record, FailureReason::Timeout, &diagnostic).await?;
            Ok(RecoveryResult::Failed)
        }

        RecoveryAction::Reinvoke => reinvoke(deps, &record).await,
    }
}

/// Flatten one poll response into the decision table's observation.
fn observe(poll: TaskPoll) -> (ObservedTask, Vec<atelier_providers::TaskOutput>) {
    match poll {
        TaskPoll::Running => (ObservedTask::Running, Vec::new()),
        TaskPoll::Failed { reason } => (ObservedTask::Failed { reason }, Vec::new()),
        TaskPoll::Succeeded { outputs } => {
            let url = outputs.first().map(|o| o.url.clone());
            (ObservedTask::Done { output_url: url }, outputs)
        }
    }
}

/// Download the provider's output, upload it to storage, complete.
async fn complete_from_output(
    deps: &SweeperDeps,
    record: &Generation,
    output_url: &str,
    outputs: &[atelier_providers::TaskOutput],
) -> Result<RecoveryResult, RecoveryError> {
    let extension = outputs
        .first()
        .map(|o| o.extension.clone())
        .unwrap_or_else(|| default_extension(&record.content_type).to_string());

    let bytes = match http::fetch_bytes(&deps.download_client, output_url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            fail_and_refund(
                deps,
                record,
                FailureReason::StorageError,
                &format!("output download failed: {e}"),
            )
            .await?;
            return Ok(RecoveryResult::Failed);
        }
    };

    let uploaded = match deps
        .uploader
        .upload(record.user_id, record.id, bytes, &extension)
        .await
    {
        Ok(uploaded) => uploaded,
        Err(e) => {
            fail_and_refund(
                deps,
                record,
                FailureReason::StorageError,
                &format!("output upload failed: {e}"),
            )
            .await?;
            return Ok(RecoveryResult::Failed);
        }
    };

    let variants = variants_json(outputs);
    GenerationRepo::record_uploaded(
        &deps.pool,
        record.id,
        &uploaded.public_url,
        Some(&uploaded.storage_path),
        variants.as_ref(),
    )
    .await?;
    GenerationRepo::complete(
        &deps.pool,
        record.id,
        &uploaded.public_url,
        Some(&uploaded.storage_path),
        variants.as_ref(),
    )
    .await?;
    audit(deps, record, "sweep_completed", serde_json::json!({
        "detail": "completed from provider output",
        "output_url": uploaded.public_url,
    }))
    .await;
    Ok(RecoveryResult::Completed)
}

/// Re-dispatch a pending record whose provider call never happened.
///
/// A sync outcome finishes the whole lifecycle here. An async outcome
/// records the task handle and moves on; the task is picked up by the
/// next sweep's status poll once it goes stale again, or sooner by the
/// API's poller if the service also tracks it.
async fn reinvoke(
    deps: &SweeperDeps,
    record: &Generation,
) -> Result<RecoveryResult, RecoveryError> {
    let model = match find_model(&record.model_id) {
        Ok(model) => model,
        Err(_) => {
            fail_and_refund(
                deps,
                record,
                FailureReason::ProviderError,
                &format!("unknown model '{}'", record.model_id),
            )
            .await?;
            return Ok(RecoveryResult::Failed);
        }
    };

    let request = DispatchRequest {
        generation_id: record.id,
        model_id: record.model_id.clone(),
        prompt: record
            .enhanced_prompt
            .clone()
            .unwrap_or_else(|| record.prompt.clone()),
        params: record.params.clone(),
    };
    let request_snapshot = serde_json::json!({
        "provider": model.provider,
        "model_id": request.model_id,
        "params": request.params,
    });

    if !GenerationRepo::mark_processing(&deps.pool, record.id, &request_snapshot).await? {
        // Someone else advanced it between the scan and now.
        return Ok(RecoveryResult::Skipped);
    }

    match deps
        .registry
        .dispatch(model.provider, &request, deps.dispatch_timeout)
        .await
    {
        Ok(DispatchOutcome::Sync(artifact)) => {
            GenerationRepo::record_provider_response(&deps.pool, record.id, &artifact.metadata)
                .await?;
            match deps
                .uploader
                .upload(record.user_id, record.id, artifact.bytes, &artifact.extension)
                .await
            {
                Ok(uploaded) => {
                    GenerationRepo::record_uploaded(
                        &deps.pool,
                        record.id,
                        &uploaded.public_url,
                        Some(&uploaded.storage_path),
                        None,
                    )
                    .await?;
                    GenerationRepo::complete(
                        &deps.pool,
                        record.id,
                        &uploaded.public_url,
                        Some(&uploaded.storage_path),
                        None,
                    )
                    .await?;
                    audit(deps, record, "sweep_reinvoked", serde_json::json!({
                        "detail": "re-dispatched and completed",
                    }))
                    .await;
                    Ok(RecoveryResult::Reinvoked)
                }
                Err(e) => {
                    fail_and_refund(
                        deps,
                        record,
                        FailureReason::StorageError,
                        &format!("output upload failed: {e}"),
                    )
                    .await?;
                    Ok(RecoveryResult::Failed)
                }
            }
        }
        Ok(DispatchOutcome::Async(handle)) => {
            ProviderTaskRepo::create(
                &deps.pool,
                record.id,
                model.provider,
                &handle.task_id,
                handle.poll_interval.map(|d| d.as_secs() as i64),
            )
            .await?;
            audit(deps, record, "sweep_reinvoked", serde_json::json!({
                "detail": "re-dispatched as async task",
                "task_id": handle.task_id,
            }))
            .await;
            Ok(RecoveryResult::Reinvoked)
        }
        Err(e) => {
            fail_and_refund(
                deps,
                record,
                FailureReason::ProviderError,
                &format!("re-dispatch failed: {e}"),
            )
            .await?;
            Ok(RecoveryResult::Failed)
        }
    }
}

/// Fail the record, refund its reservation (at most once), audit.
async fn fail_and_refund(
    deps: &SweeperDeps,
    record: &Generation,
    reason: FailureReason,
    detail: &str,
) -> Result<(), RecoveryError> {
    let message = format!("{}: {detail}", reason.as_str());
    let transitioned = GenerationRepo::fail(&deps.pool, record.id, &message).await?;
    if !transitioned {
        // Already terminal; the refund guard below still applies.
        tracing::debug!(generation_id = record.id, "fail skipped, already terminal");
    }
    LedgerRepo::refund_generation(&deps.pool, record.id, record.user_id, record.token_cost)
        .await?;
    audit(deps, record, "sweep_failed", serde_json::json!({
        "reason": reason.as_str(),
        "detail": detail,
    }))
    .await;
    Ok(())
}

/// Best-effort audit write; an audit failure must not abort recovery.
async fn audit(
    deps: &SweeperDeps,
    record: &Generation,
    action: &str,
    detail: serde_json::Value,
) {
    if let Err(e) =
        AuditRepo::record(&deps.pool, Some(record.id), Some(record.user_id), action, &detail).await
    {
        tracing::error!(generation_id = record.id, error = %e, "audit write failed");
    }
}

fn variants_json(outputs: &[atelier_providers::TaskOutput]) -> Option<serde_json::Value> {
    if outputs.len() <= 1 {
        return None;
    }
    Some(serde_json::Value::Array(
        outputs
            .iter()
            .map(|o| serde_json::json!({ "url": o.url, "extension": o.extension }))
            .collect(),
    ))
}

/// Fallback output extension when the provider URL carries none.
fn default_extension(content_type: &str) -> &'static str {
    match ContentType::parse(content_type) {
        Ok(ContentType::Image) => "png",
        Ok(ContentType::Video) => "mp4",
        Ok(ContentType::Audio) => "mp3",
        Ok(ContentType::Text) => "txt",
        Err(_) => "bin",
    }
}

/// Why one record's recovery was abandoned for this sweep.
#[derive(Debug, thiserror::Error)]
enum RecoveryError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_maps_success_to_first_output_url() {
        let poll = TaskPoll::Succeeded {
            outputs: vec![
                atelier_providers::TaskOutput {
                    url: "https://p.example/a.mp4".into(),
                    extension: "mp4".into(),
                },
                atelier_providers::TaskOutput {
                    url: "https://p.example/b.mp4".into(),
                    extension: "mp4".into(),
                },
            ],
        };
        let (observed, outputs) = observe(poll);
        assert_eq!(
            observed,
            ObservedTask::Done {
                output_url: Some("https://p.example/a.mp4".into())
            }
        );
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn observe_maps_empty_success_to_done_without_output() {
        let (observed, outputs) = observe(TaskPoll::Succeeded { outputs: vec![] });
        assert_eq!(observed, ObservedTask::Done { output_url: None });
        assert!(outputs.is_empty());
    }

    #[test]
    fn single_output_has_no_variants() {
        let outputs = vec![atelier_providers::TaskOutput {
            url: "https://p.example/a.png".into(),
            extension: "png".into(),
        }];
        assert!(variants_json(&outputs).is_none());
    }

    #[test]
    fn batch_outputs_are_all_kept_as_variants() {
        let outputs: Vec<_> = (0..4)
            .map(|i| atelier_providers::TaskOutput {
                url: format!("https://p.example/{i}.png"),
                extension: "png".into(),
            })
            .collect();
        let variants = variants_json(&outputs).unwrap();
        assert_eq!(variants.as_array().unwrap().len(), 4);
    }

    #[test]
    fn default_extensions_follow_content_type() {
        assert_eq!(default_extension("image"), "png");
        assert_eq!(default_extension("video"), "mp4");
        assert_eq!(default_extension("audio"), "mp3");
        assert_eq!(default_extension("text"), "txt");
        assert_eq!(default_extension("mystery"), "bin");
    }
}
