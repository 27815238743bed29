pub mod health;
pub mod jobs;
pub mod queue;
pub mod requeue;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                     enqueue (POST)
/// /jobs/{id}                status (GET)
/// /queue/stats              counts (GET)
///
/// /admin/queue/pause        pause intake (POST)
/// /admin/queue/resume       resume intake (POST)
/// /admin/queue/clean        remove old finished jobs (POST)
/// /admin/requeue            sweep the failed set (POST)
/// /admin/requeue/stats      failed set statistics (GET)
/// /admin/requeue/{id}       requeue one failed job (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/queue", queue::router())
        .nest("/admin/queue", queue::admin_router())
        .nest("/admin/requeue", requeue::admin_router())
}
