//! Handlers for job submission and status.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use genq_core::error::CoreError;
use genq_core::job::{JobRequest, DEFAULT_RETRY_BUDGET, PRIORITY_NORMAL};
use genq_pipeline::JobStatusView;
use serde::Deserialize;
use validator::Validate;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Longest accepted submission delay, matching the queue's scheduling
/// horizon (ten years).
pub const MAX_DELAY_MS: u64 = 315_360_000_000;

/// Request body for POST /jobs.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 128))]
    pub template_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub requester_id: Option<String>,
    #[validate(range(min = -100, max = 100))]
    pub priority: Option<i32>,
    #[validate(range(min = 1, max = 20))]
    pub retry_budget: Option<u32>,
    /// Milliseconds before the job becomes claimable.
    #[serde(default)]
    #[validate(range(max = MAX_DELAY_MS))]
    pub delay_ms: u64,
}

impl CreateJobRequest {
    fn into_parts(self) -> (JobRequest, Duration) {
        let mut request = JobRequest::new(self.template_name, self.parameters, self.requester_id)
            .with_priority(self.priority.unwrap_or(PRIORITY_NORMAL));
        request.retry_budget = self.retry_budget.unwrap_or(DEFAULT_RETRY_BUDGET);
        (request, Duration::from_millis(self.delay_ms))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Enqueue a generation request. Returns 201 with the new job's status.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateJobRequest>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let (request, delay) = input.into_parts();
    let job = state.producer.enqueue_delayed(request, delay).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobStatusView::from(job),
        }),
    ))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let view = state
        .producer
        .get_job(&job_id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Job",
            id: job_id,
        })?;
    Ok(Json(DataResponse { data: view }))
}
