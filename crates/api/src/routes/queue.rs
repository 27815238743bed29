use axum::routing::{get, post};
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(queue::get_stats))
}

/// Admin routes mounted at `/admin/queue`.
///
/// ```text
/// POST /pause   -> pause
/// POST /resume  -> resume
/// POST /clean   -> clean
/// ```
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/pause", post(queue::pause))
        .route("/resume", post(queue::resume))
        .route("/clean", post(queue::clean))
}
