//! Handlers for queue statistics and admin queue control.

use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use genq_core::queue::JobState;
use genq_core::types::JobId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Longest accepted clean grace period (ten years).
pub const MAX_GRACE_SECS: u64 = 315_360_000;

/// Request body for POST /admin/queue/clean.
#[derive(Debug, Deserialize, Validate)]
pub struct CleanRequest {
    /// Only entries that finished at least this long ago are removed.
    #[serde(default)]
    #[validate(range(max = MAX_GRACE_SECS))]
    pub grace_secs: u64,
    pub state: JobState,
}

/// Response for POST /admin/queue/clean.
#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub removed: usize,
    pub job_ids: Vec<JobId>,
}

/// GET /api/v1/queue/stats
pub async fn get_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let counts = state.producer.counts().await?;
    Ok(Json(DataResponse { data: counts }))
}

/// POST /api/v1/admin/queue/pause
///
/// Stop workers from claiming new jobs. Jobs already claimed keep running.
pub async fn pause(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.producer.pause().await?;
    let counts = state.producer.counts().await?;
    Ok(Json(DataResponse { data: counts }))
}

/// POST /api/v1/admin/queue/resume
pub async fn resume(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    state.producer.resume().await?;
    let counts = state.producer.counts().await?;
    Ok(Json(DataResponse { data: counts }))
}

/// POST /api/v1/admin/queue/clean
pub async fn clean(
    State(state): State<AppState>,
    Json(input): Json<CleanRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let job_ids = state
        .producer
        .clean(Duration::from_secs(input.grace_secs), input.state)
        .await?;
    Ok(Json(DataResponse {
        data: CleanResponse {
            removed: job_ids.len(),
            job_ids,
        },
    }))
}
