//! Handlers for the `/generations` resource.
//!
//! All endpoints require authentication via [`AuthUser`].
//! Admin users can list all generations; regular users see only their own.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use atelier_core::error::CoreError;
use atelier_core::types::DbId;
use atelier_db::models::generation::{Generation, GenerationListQuery, SubmitGeneration};
use atelier_db::repositories::GenerationRepo;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::service;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a generation by ID and verify the caller owns it (or is admin).
///
/// Returns `NotFound` if the record does not exist, `Forbidden` if the
/// caller is not the owner and is not an admin. `action` is used in the
/// error message (e.g. "view", "cancel", "retry").
async fn find_and_authorize(
    pool: &sqlx::PgPool,
    generation_id: DbId,
    auth: &AuthUser,
    action: &str,
) -> AppResult<Generation> {
    let generation = GenerationRepo::find_by_id(pool, generation_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Generation",
            id: generation_id,
        }))?;

    if generation.user_id != auth.user_id && !auth.is_admin() {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "Cannot {action} another user's generation"
        ))));
    }

    Ok(generation)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/generations
///
/// Submit a new generation. Returns 201 with the record in whatever
/// state the request reached: terminal for sync models, `processing`
/// for async ones.
pub async fn submit_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitGeneration>,
) -> AppResult<impl IntoResponse> {
    let generation = service::generations::submit(&state, auth.user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: generation })))
}

// ---------------------------------------------------------------------------
// List / get
// ---------------------------------------------------------------------------

/// GET /api/v1/generations
///
/// List generations. Admin users see all; regular users see only their
/// own. Supports optional `status_id`, `limit`, and `offset` query
/// parameters.
pub async fn list_generations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<GenerationListQuery>,
) -> AppResult<Json<DataResponse<Vec<Generation>>>> {
    let generations = if auth.is_admin() {
        GenerationRepo::list_all(&state.pool, &params).await?
    } else {
        GenerationRepo::list_by_user(&state.pool, auth.user_id, &params).await?
    };

    Ok(Json(DataResponse { data: generations }))
}

/// GET /api/v1/generations/{id}
pub async fn get_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Generation>>> {
    let generation = find_and_authorize(&state.pool, id, &auth, "view").await?;
    Ok(Json(DataResponse { data: generation }))
}

// ---------------------------------------------------------------------------
// Cancel / retry
// ---------------------------------------------------------------------------

/// POST /api/v1/generations/{id}/cancel
///
/// Cancel a non-terminal generation and release its reservation.
/// Returns 409 if the record is already terminal.
pub async fn cancel_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Generation>>> {
    let generation = find_and_authorize(&state.pool, id, &auth, "cancel").await?;
    let cancelled = service::generations::cancel(&state, &generation).await?;
    Ok(Json(DataResponse { data: cancelled }))
}

/// POST /api/v1/generations/{id}/retry
///
/// Retry a failed generation as a fresh record linked to the original.
/// Returns 201 with the new record; 409 if the original is not failed.
pub async fn retry_generation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let generation = find_and_authorize(&state.pool, id, &auth, "retry").await?;
    let retried = service::generations::retry(&state, &generation).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: retried })))
}
