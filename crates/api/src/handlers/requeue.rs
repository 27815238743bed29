//! Handlers for the failed-job requeue sweep.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for POST /admin/requeue.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Report what would happen without touching the queue.
    #[serde(default)]
    pub dry_run: bool,
}

/// GET /api/v1/admin/requeue/stats
pub async fn get_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.sweeper.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}

/// POST /api/v1/admin/requeue
///
/// Run a sweep over the whole failed set. Returns 409 while another sweep
/// is in progress.
pub async fn sweep(
    State(state): State<AppState>,
    Json(input): Json<SweepRequest>,
) -> AppResult<impl IntoResponse> {
    let report = if input.dry_run {
        state.sweeper.dry_run().await?
    } else {
        state.sweeper.sweep().await?
    };

    tracing::info!(
        dry_run = report.dry_run,
        evaluated = report.evaluated,
        requeued = report.requeued.len(),
        rejected = report.rejected.len(),
        "Requeue sweep triggered via API",
    );
    Ok(Json(DataResponse { data: report }))
}

/// POST /api/v1/admin/requeue/{id}
pub async fn requeue_one(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let report = state.sweeper.requeue_one(&job_id).await?;
    Ok(Json(DataResponse { data: report }))
}
