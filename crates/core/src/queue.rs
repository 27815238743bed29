//! Durable queue abstraction.
//!
//! The job engine does not own persistence. It talks to a durable queue
//! through the [`JobQueue`] trait, which provides atomic claiming, a
//! failed set, retention, and the attempt/backoff mechanism that the
//! worker loop relies on for in-queue retries.
//!
//! Two implementations exist: [`MemoryJobQueue`](crate::memory_queue::MemoryJobQueue)
//! here, and the Postgres-backed queue in the `genq-db` crate.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::DEFAULT_RETRY_BUDGET;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Base delay of the exponential backoff between in-queue attempts.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Completed jobs retained before the oldest are dropped.
pub const DEFAULT_KEEP_COMPLETED: usize = 50;

/// Failed jobs retained before the oldest are dropped.
pub const DEFAULT_KEEP_FAILED: usize = 100;

/// Upper bound on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Longest enqueue delay or clean grace period the queue accepts (ten years).
pub const MAX_SCHEDULE_OFFSET: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready to be claimed.
    Waiting,
    /// Waiting for `run_at` (initial delay or backoff between attempts).
    Delayed,
    /// Claimed by a worker slot.
    Active,
    Completed,
    /// In the failed set: all attempts exhausted.
    Failed,
}

impl JobState {
    /// String representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Parse from storage. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "delayed" => Some(JobState::Delayed),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Queue records
// ---------------------------------------------------------------------------

/// Options accepted by [`JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub job_id: JobId,
    /// Higher values are claimed first.
    pub priority: i32,
    /// Delay before the job becomes claimable.
    pub delay: Duration,
    /// Total attempts before the job lands in the failed set.
    pub attempts: u32,
    pub backoff_base: Duration,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl EnqueueOptions {
    /// Options with the default attempt, backoff, and retention settings.
    pub fn new(job_id: impl Into<JobId>) -> Self {
        Self {
            job_id: job_id.into(),
            priority: 0,
            delay: Duration::ZERO,
            attempts: DEFAULT_RETRY_BUDGET,
            backoff_base: DEFAULT_BACKOFF_BASE,
            keep_completed: DEFAULT_KEEP_COMPLETED,
            keep_failed: DEFAULT_KEEP_FAILED,
        }
    }
}

/// Failure details recorded when an attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub message: String,
    /// HTTP status of the backend response that caused the failure, if any.
    pub status_code: Option<u16>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status_code,
        }
    }
}

/// A job as stored by the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub state: JobState,
    pub priority: i32,
    /// Serialized [`JobRequest`](crate::job::JobRequest).
    pub data: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub failure: Option<JobFailure>,
    /// When the entry was added to the queue.
    pub created_at: Timestamp,
    /// Earliest time the entry may be claimed.
    pub run_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl QueuedJob {
    /// Failure message of the last failed attempt, if any.
    pub fn failed_reason(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }
}

/// Aggregate counts over the whole queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub paused: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} is {state}, expected {expected}")]
    InvalidState {
        id: JobId,
        state: JobState,
        expected: JobState,
    },

    /// A delay or grace period outside [`MAX_SCHEDULE_OFFSET`].
    #[error("{what} of {}s exceeds the maximum of {}s", value.as_secs(), MAX_SCHEDULE_OFFSET.as_secs())]
    OutOfRange { what: &'static str, value: Duration },

    #[error("Queue storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// Capabilities the job engine requires from a durable queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job. Re-adding an existing id returns the existing entry.
    async fn enqueue(
        &self,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, QueueError>;

    /// Atomically claim the next claimable job, marking it active.
    ///
    /// Returns `None` when the queue is paused or nothing is ready.
    async fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError>;

    async fn update_progress(&self, id: &str, percent: u8) -> Result<(), QueueError>;

    async fn complete(&self, id: &str, result: serde_json::Value) -> Result<(), QueueError>;

    /// Record a failed attempt.
    ///
    /// Schedules another attempt with exponential backoff while attempts
    /// remain; otherwise moves the job into the failed set. Returns the
    /// resulting state.
    async fn fail(&self, id: &str, failure: JobFailure) -> Result<JobState, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<QueuedJob>, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Snapshot of every job currently in the failed set.
    async fn failed_jobs(&self) -> Result<Vec<QueuedJob>, QueueError>;

    /// Delete a job. Returns `false` when it did not exist.
    async fn remove(&self, id: &str) -> Result<bool, QueueError>;

    async fn pause(&self) -> Result<(), QueueError>;

    async fn resume(&self) -> Result<(), QueueError>;

    async fn is_paused(&self) -> Result<bool, QueueError>;

    /// Delete finished jobs in `state` that finished more than `grace` ago.
    async fn clean(&self, grace: Duration, state: JobState) -> Result<Vec<JobId>, QueueError>;

    /// Take the queue-wide requeue sweep lock.
    ///
    /// Returns `None` while another holder, in this process or another one
    /// sharing the queue, has it.
    async fn try_lock_sweep(&self) -> Result<Option<SweepLock>, QueueError>;
}

/// Held queue-wide sweep lock. Dropping it also releases the lock, but
/// possibly later than [`SweepLease::release`] would.
pub type SweepLock = Box<dyn SweepLease>;

#[async_trait]
pub trait SweepLease: Send {
    async fn release(self: Box<Self>);
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Delay before the next attempt after `attempts_made` failed attempts.
///
/// `base * 2^(attempts_made - 1)`: with a 2 s base this is 2 s, 4 s, 8 s...
/// Capped at one hour.
pub fn backoff_delay(base: Duration, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(20);
    base.saturating_mul(1u32 << exponent).min(MAX_BACKOFF)
}

/// Convert a std duration into a chrono duration for timestamp math.
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Reject offsets beyond [`MAX_SCHEDULE_OFFSET`].
pub fn check_schedule_offset(what: &'static str, value: Duration) -> Result<(), QueueError> {
    if value > MAX_SCHEDULE_OFFSET {
        return Err(QueueError::OutOfRange { what, value });
    }
    Ok(())
}

/// `now + delay`, the earliest claim time of a delayed job.
pub fn run_at_after(now: Timestamp, delay: Duration) -> Result<Timestamp, QueueError> {
    check_schedule_offset("delay", delay)?;
    now.checked_add_signed(to_chrono(delay))
        .ok_or(QueueError::OutOfRange { what: "delay", value: delay })
}

/// `now - grace`: jobs finished at or before this are old enough to clean.
pub fn clean_cutoff(now: Timestamp, grace: Duration) -> Result<Timestamp, QueueError> {
    check_schedule_offset("grace period", grace)?;
    now.checked_sub_signed(to_chrono(grace))
        .ok_or(QueueError::OutOfRange { what: "grace period", value: grace })
}
