//! Route definitions for admin recovery operations.

use axum::routing::post;
use axum::Router;

use crate::handlers::sweep;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// POST   /sweep           -> trigger_sweep (admin only)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/sweep", post(sweep::trigger_sweep))
}
