pub mod generations;
pub mod health;
pub mod sweep;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generations                       list (GET), submit (POST)
/// /generations/{id}                  get
/// /generations/{id}/cancel           cancel (POST)
/// /generations/{id}/retry            retry (POST)
///
/// /admin/sweep                       trigger recovery sweep (POST, admin)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/generations", generations::router())
        .nest("/admin", sweep::router())
}
