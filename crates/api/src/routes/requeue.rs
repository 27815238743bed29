use axum::routing::{get, post};
use axum::Router;

use crate::handlers::requeue;
use crate::state::AppState;

/// Admin routes mounted at `/admin/requeue`.
///
/// ```text
/// POST /        -> sweep
/// GET  /stats   -> get_stats
/// POST /{id}    -> requeue_one
/// ```
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", post(requeue::sweep))
        .route("/stats", get(requeue::get_stats))
        .route("/{id}", post(requeue::requeue_one))
}
