//! Generation lifecycle orchestration.
//!
//! The submit flow runs in a fixed order so that no failure mode can
//! leak tokens or wedge a record:
//!
//! 1. validate (no side effects)
//! 2. capacity checks — breaker, then in-flight permit; a rejected
//!    request has reserved nothing
//! 3. reserve credits (single atomic decrement)
//! 4. insert the pending record
//! 5. dispatch — sync outcomes upload before the completion write,
//!    async outcomes record the task and hand off to a detached poller
//!
//! Every failure branch after step 3 pairs with exactly one refund
//! (guarded by the record's `refunded` flag) and an audit row.

use std::time::Duration;

use atelier_core::cost::{compute_cost, find_model, validate_params, validate_prompt, ModelSpec};
use atelier_core::error::CoreError;
use atelier_core::lifecycle::{FailureReason, GenerationStatus};
use atelier_core::types::DbId;
use atelier_db::models::generation::{Generation, NewGeneration, SubmitGeneration};
use atelier_db::repositories::{AuditRepo, GenerationRepo, LedgerRepo, ProviderTaskRepo};
use atelier_providers::poller::{poll_until_terminal, PollConfig, PollResult};
use atelier_providers::{http, DispatchOutcome, DispatchRequest, ProviderError, TaskOutput};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Submit a new generation for `user_id`.
///
/// Returns the record as it stands when the request completes: terminal
/// for sync models, `processing` for async ones (the detached poller
/// finishes those), or `failed` when dispatch was rejected after the
/// reservation.
pub async fn submit(
    state: &AppState,
    user_id: DbId,
    input: &SubmitGeneration,
) -> AppResult<Generation> {
    // 1. Validation, before any side effect.
    let model = find_model(&input.model_id)?;
    validate_prompt(&input.prompt)?;
    if let Some(enhanced) = &input.enhanced_prompt {
        validate_prompt(enhanced)?;
    }
    let params = validate_params(model, &input.params)?;
    let cost = compute_cost(model, &params);

    // 2. Capacity. Neither rejection has reserved anything.
    state.breaker.check().map_err(|open| {
        CoreError::Capacity {
            reason: "Generation dispatch is temporarily suspended after repeated provider failures"
                .into(),
            retry_after_secs: Some(open.retry_after_secs),
        }
    })?;
    let _permit = state.limiter.try_acquire().ok_or_else(|| CoreError::Capacity {
        reason: format!(
            "Too many concurrent generations (limit {})",
            state.limiter.limit()
        ),
        retry_after_secs: None,
    })?;

    // 3. Reserve credits atomically.
    reserve_or_reject(state, user_id, cost).await?;

    // 4. Persist the pending record. From here on, every failure path
    //    must release the reservation exactly once.
    let new = NewGeneration {
        model_id: input.model_id.clone(),
        content_type: model.content_type.as_str().to_string(),
        prompt: input.prompt.clone(),
        enhanced_prompt: input.enhanced_prompt.clone(),
        params: input.params.clone(),
        token_cost: cost,
        retry_of_generation_id: None,
    };
    let record = match GenerationRepo::submit(&state.pool, user_id, &new).await {
        Ok(record) => record,
        Err(e) => {
            // The insert failed after the decrement; restore the balance
            // directly since no record exists to carry the refund flag.
            if let Err(refund_err) = LedgerRepo::credit(&state.pool, user_id, cost).await {
                tracing::error!(
                    user_id,
                    amount = cost,
                    error = %refund_err,
                    "failed to restore reservation after insert failure"
                );
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        generation_id = record.id,
        user_id,
        model_id = %record.model_id,
        token_cost = cost,
        "generation submitted"
    );

    // 5. Dispatch.
    dispatch_record(state, &record, model).await?;

    refreshed(state, record.id).await
}

/// Reserve `cost` tokens or reject with the current balance.
async fn reserve_or_reject(state: &AppState, user_id: DbId, cost: i64) -> AppResult<()> {
    if LedgerRepo::reserve(&state.pool, user_id, cost).await? {
        return Ok(());
    }
    let available = LedgerRepo::find_by_user(&state.pool, user_id)
        .await?
        .map(|s| s.tokens_remaining)
        .unwrap_or(0);
    Err(AppError::Core(CoreError::InsufficientTokens {
        required: cost,
        available,
    }))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch a pending record to its model's provider.
///
/// Used by submit and retry. Assumes credits are reserved; every
/// failure inside pairs with one refund and an audit row, never an
/// error to the caller (the caller re-reads the record instead).
pub(crate) async fn dispatch_record(
    state: &AppState,
    record: &Generation,
    model: &'static ModelSpec,
) -> AppResult<()> {
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

    if !GenerationRepo::mark_processing(&state.pool, record.id, &request_snapshot).await? {
        // Cancelled (or otherwise advanced) between insert and dispatch.
        tracing::info!(generation_id = record.id, "dispatch skipped, record no longer pending");
        return Ok(());
    }

    match state
        .registry
        .dispatch(model.provider, &request, state.config.dispatch_timeout())
        .await
    {
        Ok(DispatchOutcome::Sync(artifact)) => {
            state.breaker.record_success();
            GenerationRepo::record_provider_response(&state.pool, record.id, &artifact.metadata)
                .await?;
            finish_with_output(state, record, artifact.bytes, &artifact.extension, None).await
        }
        Ok(DispatchOutcome::Async(handle)) => {
            state.breaker.record_success();
            ProviderTaskRepo::create(
                &state.pool,
                record.id,
                model.provider,
                &handle.task_id,
                handle.poll_interval.map(|d| d.as_secs() as i64),
            )
            .await?;
            tracing::info!(
                generation_id = record.id,
                provider = model.provider,
                task_id = %handle.task_id,
                "async task accepted"
            );
            spawn_poller(
                state.clone(),
                record.clone(),
                model.provider,
                handle.task_id,
                handle.poll_interval,
            );
            Ok(())
        }
        Err(err) => {
            state.breaker.record_failure();
            let snapshot = serde_json::json!({ "error": err.to_string() });
            GenerationRepo::record_provider_response(&state.pool, record.id, &snapshot).await?;
            let reason = match &err {
                ProviderError::Timeout(_) => FailureReason::Timeout,
                _ => FailureReason::ProviderError,
            };
            fail_and_refund(state, record, reason, &err.to_string()).await
        }
    }
}

/// Upload the output bytes and flip the record to completed.
///
/// The upload strictly precedes the status write; an upload failure
/// fails the record with a refund instead of completing it without a
/// stored object.
async fn finish_with_output(
    state: &AppState,
    record: &Generation,
    bytes: Vec<u8>,
    extension: &str,
    variants: Option<serde_json::Value>,
) -> AppResult<()> {
    let uploaded = match state
        .uploader
        .upload(record.user_id, record.id, bytes, extension)
        .await
    {
        Ok(uploaded) => uploaded,
        Err(e) => {
            return fail_and_refund(
                state,
                record,
                FailureReason::StorageError,
                &format!("output upload failed: {e}"),
            )
            .await;
        }
    };

    // Persist the upload evidence before the status flip; if the
    // process dies between these two writes the sweeper finds the URL
    // on the row and advances the record instead of failing it.
    GenerationRepo::record_uploaded(
        &state.pool,
        record.id,
        &uploaded.public_url,
        Some(&uploaded.storage_path),
        variants.as_ref(),
    )
    .await?;
    GenerationRepo::complete(
        &state.pool,
        record.id,
        &uploaded.public_url,
        Some(&uploaded.storage_path),
        variants.as_ref(),
    )
    .await?;
    tracing::info!(
        generation_id = record.id,
        output_url = %uploaded.public_url,
        "generation completed"
    );
    Ok(())
}

/// Fail the record, refund its reservation (at most once), audit.
async fn fail_and_refund(
    state: &AppState,
    record: &Generation,
    reason: FailureReason,
    detail: &str,
) -> AppResult<()> {
    let message = format!("{}: {detail}", reason.as_str());
    GenerationRepo::fail(&state.pool, record.id, &message).await?;
    LedgerRepo::refund_generation(&state.pool, record.id, record.user_id, record.token_cost)
        .await?;
    AuditRepo::record(
        &state.pool,
        Some(record.id),
        Some(record.user_id),
        "generation_failed",
        &serde_json::json!({ "reason": reason.as_str(), "detail": detail }),
    )
    .await?;
    tracing::warn!(
        generation_id = record.id,
        reason = reason.as_str(),
        detail,
        "generation failed"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Async poll loop
// ---------------------------------------------------------------------------

/// Spawn the detached poll loop for an accepted async task.
///
/// The task owns its errors: every outcome, including internal ones, is
/// written back to the record or logged — nothing is silently dropped
/// with the record left in `processing` (the sweeper is the backstop if
/// this process dies).
fn spawn_poller(
    state: AppState,
    record: Generation,
    provider_name: &'static str,
    task_id: String,
    interval_override: Option<Duration>,
) {
    tokio::spawn(async move {
        if let Err(e) = poll_and_settle(&state, &record, provider_name, &task_id, interval_override)
            .await
        {
            tracing::error!(
                generation_id = record.id,
                task_id = %task_id,
                error = %e,
                "poll loop failed to settle record"
            );
        }
    });
}

async fn poll_and_settle(
    state: &AppState,
    record: &Generation,
    provider_name: &'static str,
    task_id: &str,
    interval_override: Option<Duration>,
) -> AppResult<()> {
    let provider = state
        .registry
        .get(provider_name)
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let config = PollConfig {
        interval: state.config.poll_interval(),
        deadline: state.config.poll_deadline(),
    }
    .with_interval_override(interval_override);

    let pool = state.pool.clone();
    let generation_id = record.id;
    let is_cancelled = || {
        let pool = pool.clone();
        async move {
            match GenerationRepo::find_by_id(&pool, generation_id).await {
                Ok(Some(current)) => GenerationStatus::from_id(current.status_id)
                    .map(GenerationStatus::is_terminal)
                    .unwrap_or(false),
                // Transient read failure: keep polling.
                Ok(None) | Err(_) => false,
            }
        }
    };

    let result =
        poll_until_terminal(provider, task_id, config, &state.shutdown, is_cancelled).await;

    match result {
        PollResult::Succeeded(outputs) => settle_success(state, record, outputs).await,
        PollResult::Failed { reason } => {
            let snapshot = serde_json::json!({ "error": reason });
            GenerationRepo::record_provider_response(&state.pool, record.id, &snapshot).await?;
            fail_and_refund(state, record, FailureReason::ProviderError, &reason).await
        }
        PollResult::TimedOut => {
            fail_and_refund(
                state,
                record,
                FailureReason::Timeout,
                "async task did not finish before the poll deadline",
            )
            .await
        }
        PollResult::Cancelled => {
            // Either the record reached a terminal state (cancel handles
            // its own refund) or the process is shutting down and the
            // sweeper will pick the record up.
            tracing::info!(generation_id = record.id, "poll loop stopped without settling");
            Ok(())
        }
    }
}

/// Download, store, and complete from a successful task's outputs.
async fn settle_success(
    state: &AppState,
    record: &Generation,
    outputs: Vec<TaskOutput>,
) -> AppResult<()> {
    let first = match outputs.first() {
        Some(first) => first.clone(),
        None => {
            return fail_and_refund(
                state,
                record,
                FailureReason::ProviderError,
                "provider reported success without any output",
            )
            .await;
        }
    };

    let bytes = match http::fetch_bytes(&state.download_client, &first.url).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return fail_and_refund(
                state,
                record,
                FailureReason::StorageError,
                &format!("output download failed: {e}"),
            )
            .await;
        }
    };

    let variants = if outputs.len() > 1 {
        Some(serde_json::Value::Array(
            outputs
                .iter()
                .map(|o| serde_json::json!({ "url": o.url, "extension": o.extension }))
                .collect(),
        ))
    } else {
        None
    };

    finish_with_output(state, record, bytes, &first.extension, variants).await
}

// ---------------------------------------------------------------------------
// Cancel / retry
// ---------------------------------------------------------------------------

/// Cancel a generation and release its reservation.
///
/// The status write is the synchronization point: any poll loop sees
/// the terminal status on its next probe and stops. Refund and audit
/// follow only when this call actually performed the transition.
pub async fn cancel(state: &AppState, record: &Generation) -> AppResult<Generation> {
    if !GenerationRepo::cancel(&state.pool, record.id).await? {
        return Err(AppError::Core(CoreError::Conflict(
            "Generation is already in a terminal state".into(),
        )));
    }

    LedgerRepo::refund_generation(&state.pool, record.id, record.user_id, record.token_cost)
        .await?;
    AuditRepo::record(
        &state.pool,
        Some(record.id),
        Some(record.user_id),
        "generation_cancelled",
        &serde_json::json!({}),
    )
    .await?;
    tracing::info!(generation_id = record.id, "generation cancelled");

    refreshed(state, record.id).await
}

/// Retry a failed generation as a fresh record.
///
/// History is never rewound: the original stays `failed`, and the new
/// record links back via `retry_of_generation_id`. The retry reserves
/// its own credits before dispatching.
pub async fn retry(state: &AppState, original: &Generation) -> AppResult<Generation> {
    let status = GenerationStatus::from_id(original.status_id).ok_or_else(|| {
        AppError::InternalError(format!("unknown status id {}", original.status_id))
    })?;
    if status != GenerationStatus::Failed {
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Only failed generations can be retried (current status: {})",
            status.as_str()
        ))));
    }

    let model = find_model(&original.model_id)?;

    state.breaker.check().map_err(|open| CoreError::Capacity {
        reason: "Generation dispatch is temporarily suspended after repeated provider failures"
            .into(),
        retry_after_secs: Some(open.retry_after_secs),
    })?;
    let _permit = state.limiter.try_acquire().ok_or_else(|| CoreError::Capacity {
        reason: format!(
            "Too many concurrent generations (limit {})",
            state.limiter.limit()
        ),
        retry_after_secs: None,
    })?;

    reserve_or_reject(state, original.user_id, original.token_cost).await?;

    let record = match GenerationRepo::insert_retry(&state.pool, original).await {
        Ok(record) => record,
        Err(e) => {
            if let Err(refund_err) =
                LedgerRepo::credit(&state.pool, original.user_id, original.token_cost).await
            {
                tracing::error!(
                    user_id = original.user_id,
                    amount = original.token_cost,
                    error = %refund_err,
                    "failed to restore reservation after retry insert failure"
                );
            }
            return Err(e.into());
        }
    };

    AuditRepo::record(
        &state.pool,
        Some(record.id),
        Some(record.user_id),
        "generation_retried",
        &serde_json::json!({ "retry_of": original.id }),
    )
    .await?;
    tracing::info!(
        generation_id = record.id,
        retry_of = original.id,
        "generation retried"
    );

    dispatch_record(state, &record, model).await?;

    refreshed(state, record.id).await
}

/// Re-read a record after orchestration so the caller sees its final
/// state for this request.
async fn refreshed(state: &AppState, id: DbId) -> AppResult<Generation> {
    GenerationRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Generation",
                id,
            })
        })
}

