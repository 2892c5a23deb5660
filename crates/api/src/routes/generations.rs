//! Route definitions for the `/generations` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generations;
use crate::state::AppState;

/// Routes mounted at `/generations`.
///
/// ```text
/// GET    /                -> list_generations
/// POST   /                -> submit_generation
/// GET    /{id}            -> get_generation
/// POST   /{id}/cancel     -> cancel_generation
/// POST   /{id}/retry      -> retry_generation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(generations::list_generations).post(generations::submit_generation),
        )
        .route("/{id}", get(generations::get_generation))
        .route("/{id}/cancel", post(generations::cancel_generation))
        .route("/{id}/retry", post(generations::retry_generation))
}
