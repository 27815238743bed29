//! Requeue classification policy.
//!
//! Pure half of the requeue classifier: given a failed queue entry and a
//! [`RequeuePolicy`], [`decide`] returns a [`Transition`] without touching
//! the queue. The I/O half (adding the new job and removing the failed
//! one) lives in `genq-pipeline`.
//!
//! Decision order, first match wins:
//!
//! 1. age greater than `max_age` rejects ("too old")
//! 2. `resubmission_count >= max_retries` rejects ("retry budget exhausted")
//! 3. the ordered [`POLICY_TABLE`] (temporary entries, then permanent)
//! 4. unknown errors get one retry ("first retry for unknown error")

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::job::{JobRequest, Lineage, PRIORITY_URGENT};
use crate::queue::{to_chrono, QueuedJob};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const REASON_TOO_OLD: &str = "too old";
pub const REASON_BUDGET_EXHAUSTED: &str = "retry budget exhausted";
pub const REASON_TEMPORARY: &str = "temporary error";
pub const REASON_PERMANENT: &str = "permanent error";
pub const REASON_FIRST_UNKNOWN: &str = "first retry for unknown error";
pub const REASON_UNKNOWN_RETRIED: &str = "unknown error already retried";

/// Characters of the failure reason used as the statistics bucket key.
pub const REASON_PREFIX_LEN: usize = 50;

/// Bucket key for failures without a recorded reason.
const NO_REASON: &str = "(no reason)";

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Requeue configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Failed entries older than this are never resubmitted.
    pub max_age: Duration,
    /// Resubmissions allowed along one lineage chain.
    pub max_retries: u32,
    /// Raise resubmitted jobs to at least [`PRIORITY_URGENT`].
    pub priority_boost: bool,
    pub delay_before_requeue: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 3600),
            max_retries: 3,
            priority_boost: true,
            delay_before_requeue: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureRecord
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Job {job_id} is not in the failed set")]
    NotFailed { job_id: JobId },

    #[error("Job {job_id} has an undecodable payload: {source}")]
    Payload {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },
}

/// What the classifier knows about one failed job.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub local_job_id: JobId,
    pub reason_text: String,
    pub status_code: Option<u16>,
    /// When the failed entry entered the queue; ages are measured from here.
    pub submitted_at: Timestamp,
    pub occurred_at: Timestamp,
    pub resubmission_count: u32,
    pub origin_job_id: Option<JobId>,
    pub request: JobRequest,
}

impl FailureRecord {
    /// Build a record from an entry of the failed set.
    pub fn from_queued(job: &QueuedJob) -> Result<Self, EvaluationError> {
        if job.state != crate::queue::JobState::Failed {
            return Err(EvaluationError::NotFailed {
                job_id: job.id.clone(),
            });
        }
        let request =
            JobRequest::from_payload(&job.data).map_err(|source| EvaluationError::Payload {
                job_id: job.id.clone(),
                source,
            })?;

        Ok(Self {
            local_job_id: job.id.clone(),
            reason_text: job.failed_reason().unwrap_or_default().to_string(),
            status_code: job.failure.as_ref().and_then(|f| f.status_code),
            submitted_at: job.created_at,
            occurred_at: job.finished_at.unwrap_or(job.created_at),
            resubmission_count: request.resubmission_count(),
            origin_job_id: request.lineage.as_ref().map(|l| l.origin_job_id.clone()),
            request,
        })
    }
}

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// Outcome a matching table entry assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
}

/// What a table entry inspects.
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Case-insensitive substring of the failure reason.
    Text(&'static str),
    /// Structured HTTP status in the half-open range.
    StatusRange(u16, u16),
}

impl Matcher {
    fn matches(&self, lowered_reason: &str, status_code: Option<u16>) -> bool {
        match self {
            Matcher::Text(needle) => lowered_reason.contains(needle),
            Matcher::StatusRange(lo, hi) => status_code.is_some_and(|c| (*lo..*hi).contains(&c)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyEntry {
    pub matcher: Matcher,
    pub verdict: Verdict,
    pub reason: &'static str,
}

const fn temporary(matcher: Matcher) -> PolicyEntry {
    PolicyEntry {
        matcher,
        verdict: Verdict::Accept,
        reason: REASON_TEMPORARY,
    }
}

const fn permanent(matcher: Matcher) -> PolicyEntry {
    PolicyEntry {
        matcher,
        verdict: Verdict::Reject,
        reason: REASON_PERMANENT,
    }
}

/// Ordered classification table. Text needles are lowercase.
pub const POLICY_TABLE: &[PolicyEntry] = &[
    temporary(Matcher::Text("timeout")),
    temporary(Matcher::Text("etimedout")),
    temporary(Matcher::Text("econnrefused")),
    temporary(Matcher::Text("enotfound")),
    temporary(Matcher::Text("econnreset")),
    temporary(Matcher::Text("connection")),
    temporary(Matcher::Text("network")),
    temporary(Matcher::Text("error (5")),
    temporary(Matcher::StatusRange(500, 600)),
    temporary(Matcher::Text("failed to check job status")),
    temporary(Matcher::Text("polling")),
    permanent(Matcher::Text("template not found")),
    permanent(Matcher::Text("workflow não encontrado")),
    permanent(Matcher::Text("error (4")),
    permanent(Matcher::StatusRange(400, 500)),
    permanent(Matcher::Text("invalid")),
    permanent(Matcher::Text("validation")),
    permanent(Matcher::Text("malformed")),
];

/// First table entry matching the failure, if any.
pub fn classify(reason_text: &str, status_code: Option<u16>) -> Option<&'static PolicyEntry> {
    let lowered = reason_text.to_lowercase();
    POLICY_TABLE
        .iter()
        .find(|entry| entry.matcher.matches(&lowered, status_code))
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Result of evaluating one failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Accepted {
        reason: &'static str,
        new_request: JobRequest,
        delay: Duration,
    },
    Rejected {
        reason: &'static str,
    },
}

impl Transition {
    pub fn reason(&self) -> &'static str {
        match self {
            Transition::Accepted { reason, .. } | Transition::Rejected { reason } => reason,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Transition::Accepted { .. })
    }
}

/// Decide whether `record` should be resubmitted.
pub fn decide(record: &FailureRecord, policy: &RequeuePolicy, now: Timestamp) -> Transition {
    let age = now - record.submitted_at;
    if age > to_chrono(policy.max_age) {
        return Transition::Rejected {
            reason: REASON_TOO_OLD,
        };
    }

    if record.resubmission_count >= policy.max_retries {
        return Transition::Rejected {
            reason: REASON_BUDGET_EXHAUSTED,
        };
    }

    let (verdict, reason) = match classify(&record.reason_text, record.status_code) {
        Some(entry) => (entry.verdict, entry.reason),
        None if record.resubmission_count == 0 => (Verdict::Accept, REASON_FIRST_UNKNOWN),
        None => (Verdict::Reject, REASON_UNKNOWN_RETRIED),
    };

    match verdict {
        Verdict::Accept => Transition::Accepted {
            reason,
            new_request: resubmission(record, policy, now),
            delay: policy.delay_before_requeue,
        },
        Verdict::Reject => Transition::Rejected { reason },
    }
}

/// Request for the next link in the lineage chain.
fn resubmission(record: &FailureRecord, policy: &RequeuePolicy, now: Timestamp) -> JobRequest {
    let mut request = record.request.clone();
    request.submitted_at = now;
    request.lineage = Some(Lineage {
        origin_job_id: record
            .origin_job_id
            .clone()
            .unwrap_or_else(|| record.local_job_id.clone()),
        resubmission_count: record.resubmission_count + 1,
        requeue_timestamp: now,
    });
    if policy.priority_boost {
        request.priority = request.priority.max(PRIORITY_URGENT);
    }
    request
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Failed-set counts by age of the failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgeBuckets {
    pub last_hour: u64,
    pub last_day: u64,
    pub last_week: u64,
    pub older: u64,
}

/// Aggregate view over a snapshot of the failed set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailedSetStats {
    pub total: u64,
    pub by_reason: BTreeMap<String, u64>,
    pub by_age: AgeBuckets,
    pub by_resubmission_count: BTreeMap<u32, u64>,
}

/// Compute statistics over `failed`. Entries whose payload does not decode
/// count toward resubmission count 0.
pub fn failed_set_stats(failed: &[QueuedJob], now: Timestamp) -> FailedSetStats {
    let mut stats = FailedSetStats::default();
    for job in failed {
        stats.total += 1;

        let prefix = match job.failed_reason() {
            Some(reason) if !reason.is_empty() => reason_prefix(reason),
            _ => NO_REASON.to_string(),
        };
        *stats.by_reason.entry(prefix).or_default() += 1;

        let age = now - job.finished_at.unwrap_or(job.created_at);
        let bucket = if age <= chrono::Duration::hours(1) {
            &mut stats.by_age.last_hour
        } else if age <= chrono::Duration::days(1) {
            &mut stats.by_age.last_day
        } else if age <= chrono::Duration::weeks(1) {
            &mut stats.by_age.last_week
        } else {
            &mut stats.by_age.older
        };
        *bucket += 1;

        let count = JobRequest::from_payload(&job.data)
            .map(|r| r.resubmission_count())
            .unwrap_or(0);
        *stats.by_resubmission_count.entry(count).or_default() += 1;
    }
    stats
}

fn reason_prefix(reason: &str) -> String {
    reason.chars().take(REASON_PREFIX_LEN).collect()
}
