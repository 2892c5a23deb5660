//! Admin handler for triggering a recovery sweep on demand.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use atelier_core::types::DbId;
use atelier_sweeper::{run_sweep, SweepOutcome, SweeperDeps};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for the sweep trigger.
#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    /// Sweep exactly this generation, regardless of staleness.
    pub generation_id: Option<DbId>,
}

/// POST /api/v1/admin/sweep
///
/// Run one recovery sweep immediately (admin only). With
/// `?generation_id=` set, recovers exactly that record. Returns the
/// sweep counters.
pub async fn trigger_sweep(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> AppResult<Json<DataResponse<SweepOutcome>>> {
    auth.require_admin()?;

    let deps = sweeper_deps(&state);
    let outcome = run_sweep(&deps, query.generation_id).await?;

    tracing::info!(
        admin_id = auth.user_id,
        generation_id = query.generation_id,
        "manual sweep triggered"
    );
    Ok(Json(DataResponse { data: outcome }))
}

/// Build the sweeper dependency bundle from app state.
fn sweeper_deps(state: &AppState) -> SweeperDeps {
    SweeperDeps {
        pool: state.pool.clone(),
        registry: Arc::clone(&state.registry),
        uploader: state.uploader.clone(),
        download_client: state.download_client.clone(),
        staleness: state.config.staleness(),
        dispatch_timeout: state.config.dispatch_timeout(),
    }
}
