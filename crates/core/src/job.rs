//! Job data model shared by the producer, the worker loop, and the
//! requeue classifier.
//!
//! A [`JobRequest`] is what callers submit and what the durable queue
//! stores as the job payload. A [`SubmittedJob`] is the worker-side view
//! of one processing attempt, and [`JobOutcome`] is what a successful
//! attempt hands back to the queue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent jobs (boosted resubmissions). Claimed first.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal jobs. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background jobs. Claimed last.
pub const PRIORITY_BACKGROUND: i32 = -10;

/// Attempts the durable queue makes before a job lands in the failed set.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// Maximum length of a template name.
pub const MAX_TEMPLATE_NAME_LEN: usize = 128;

// ---------------------------------------------------------------------------
// JobRequest
// ---------------------------------------------------------------------------

/// Resubmission lineage carried by a job created by the requeue classifier.
///
/// `origin_job_id` always points at the first failed attempt in the chain;
/// `resubmission_count` is 1 for the first resubmission and grows by one
/// per hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub origin_job_id: JobId,
    pub resubmission_count: u32,
    pub requeue_timestamp: Timestamp,
}

/// An abstract image-generation request as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub template_name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub requester_id: Option<String>,
    pub submitted_at: Timestamp,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Lineage>,
}

fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}

impl JobRequest {
    /// Create a request with normal priority and the default retry budget.
    pub fn new(
        template_name: impl Into<String>,
        parameters: BTreeMap<String, serde_json::Value>,
        requester_id: Option<String>,
    ) -> Self {
        Self {
            template_name: template_name.into(),
            parameters,
            requester_id,
            submitted_at: chrono::Utc::now(),
            priority: PRIORITY_NORMAL,
            retry_budget: DEFAULT_RETRY_BUDGET,
            lineage: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// How many times this request has been resubmitted (0 for originals).
    pub fn resubmission_count(&self) -> u32 {
        self.lineage.as_ref().map_or(0, |l| l.resubmission_count)
    }

    /// Validate caller-supplied fields before enqueueing.
    pub fn validate(&self) -> Result<(), CoreError> {
        let name = self.template_name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation(
                "template_name must not be empty".to_string(),
            ));
        }
        if name.len() > MAX_TEMPLATE_NAME_LEN {
            return Err(CoreError::Validation(format!(
                "template_name must not exceed {MAX_TEMPLATE_NAME_LEN} characters"
            )));
        }
        if self.retry_budget == 0 {
            return Err(CoreError::Validation(
                "retry_budget must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize into the queue payload representation.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode a queue payload back into a request.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

// ---------------------------------------------------------------------------
// SubmittedJob
// ---------------------------------------------------------------------------

/// Worker-side lifecycle of one processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Queued,
    Submitting,
    Polling,
    Completed,
    Failed,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Queued => "queued",
            SubmissionState::Submitting => "submitting",
            SubmissionState::Polling => "polling",
            SubmissionState::Completed => "completed",
            SubmissionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Completed | SubmissionState::Failed)
    }
}

/// A job owned by one worker slot for the duration of a single attempt.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub local_job_id: JobId,
    pub backend_reference_id: Option<String>,
    progress: u8,
    state: SubmissionState,
}

impl SubmittedJob {
    pub fn new(local_job_id: impl Into<JobId>) -> Self {
        Self {
            local_job_id: local_job_id.into(),
            backend_reference_id: None,
            progress: 0,
            state: SubmissionState::Queued,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    /// Raise progress to `percent` (capped at 100).
    ///
    /// Returns `true` only when the stored value actually increased, so
    /// progress stays monotonically non-decreasing within an attempt.
    pub fn advance(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }

    /// Move to `next`. Terminal states are sticky.
    ///
    /// Returns `true` when the state changed.
    pub fn transition(&mut self, next: SubmissionState) -> bool {
        if self.state.is_terminal() || self.state == next {
            return false;
        }
        self.state = next;
        true
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A single file produced by the rendering backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub identifier: String,
    pub location: String,
    pub kind: String,
    pub producing_node: String,
}

/// Flattened output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Return value of a successful worker attempt, stored as the queue result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: String,
    pub backend_reference_id: String,
    pub results: JobResult,
    pub completed_at: Timestamp,
}

impl JobOutcome {
    pub fn completed(backend_reference_id: String, results: JobResult) -> Self {
        Self {
            status: "completed".to_string(),
            backend_reference_id,
            results,
            completed_at: chrono::Utc::now(),
        }
    }
}
