//! Errors raised while processing one job.
//!
//! The rendered messages are stored as the failure reason of the queue
//! entry and later matched by the requeue classifier, so their wording is
//! stable.

use std::time::Duration;

use genq_comfyui::ComfyUIApiError;
use genq_core::injection::InjectionError;
use genq_core::queue::{JobFailure, QueueError};

use crate::templates::TemplateStoreError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The template store failed for a reason other than absence.
    #[error("Template store error: {0}")]
    TemplateStore(#[from] TemplateStoreError),

    #[error("Template processing failed, invalid template or parameters: {0}")]
    TemplateProcessing(#[from] InjectionError),

    /// The backend answered the submission with a non-2xx status.
    #[error("Backend API error ({status}): {body}")]
    BackendSubmission { status: u16, body: String },

    /// The submission request never got an HTTP answer.
    #[error("Connection to backend failed: {0}")]
    BackendUnreachable(String),

    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    #[error("Remote execution failed: {message}")]
    RemoteExecution { message: String },

    /// Status queries kept failing until the attempt budget ran out.
    #[error("Failed to check job status: {message}")]
    StatusQuery {
        message: String,
        status: Option<u16>,
    },

    #[error("Polling timeout: job did not finish within {}s", elapsed.as_secs())]
    PollTimeout { elapsed: Duration },

    #[error("Backend returned no outputs")]
    EmptyOutput,

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl JobError {
    /// HTTP status of the backend response behind this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            JobError::BackendSubmission { status, .. } => Some(*status),
            JobError::StatusQuery { status, .. } => *status,
            _ => None,
        }
    }

    /// Classify a submission failure from the backend client.
    pub fn from_submission(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::ApiError { status, body } => JobError::BackendSubmission { status, body },
            ComfyUIApiError::Request(e) => JobError::BackendUnreachable(e.to_string()),
            ComfyUIApiError::InvalidResponse(msg) => JobError::BackendProtocol(msg),
        }
    }

    /// The failure recorded on the queue entry.
    pub fn to_failure(&self) -> JobFailure {
        JobFailure::new(self.to_string(), self.status_code())
    }
}

impl From<genq_core::extraction::ExtractError> for JobError {
    fn from(err: genq_core::extraction::ExtractError) -> Self {
        match err {
            genq_core::extraction::ExtractError::EmptyOutput => JobError::EmptyOutput,
        }
    }
}
