//! Row model for the `queue_jobs` table.

use genq_core::queue::{JobFailure, JobState, QueueCounts, QueueError, QueuedJob};
use genq_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `queue_jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct QueueJobRow {
    pub id: String,
    pub seq: i64,
    pub state: String,
    pub priority: i32,
    pub data: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub progress: i16,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub keep_completed: i32,
    pub keep_failed: i32,
    pub failed_reason: Option<String>,
    pub failed_status_code: Option<i32>,
    pub created_at: Timestamp,
    pub run_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl QueueJobRow {
    pub fn job_state(&self) -> Result<JobState, QueueError> {
        JobState::parse(&self.state).ok_or_else(|| {
            QueueError::Storage(format!("job {} has unknown state '{}'", self.id, self.state))
        })
    }
}

impl TryFrom<QueueJobRow> for QueuedJob {
    type Error = QueueError;

    fn try_from(row: QueueJobRow) -> Result<Self, Self::Error> {
        let state = row.job_state()?;
        let failure = row.failed_reason.map(|message| JobFailure {
            message,
            status_code: row.failed_status_code.and_then(|c| u16::try_from(c).ok()),
        });
        Ok(QueuedJob {
            id: row.id,
            state,
            priority: row.priority,
            data: row.data,
            result: row.result,
            progress: row.progress.clamp(0, 100) as u8,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            backoff_base_ms: row.backoff_base_ms.max(0) as u64,
            failure,
            created_at: row.created_at,
            run_at: row.run_at,
            processed_at: row.processed_at,
            finished_at: row.finished_at,
        })
    }
}

/// Aggregate counts returned by the stats query.
#[derive(Debug, Clone, FromRow)]
pub struct QueueCountsRow {
    pub waiting: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub paused: bool,
}

impl From<QueueCountsRow> for QueueCounts {
    fn from(row: QueueCountsRow) -> Self {
        QueueCounts {
            waiting: row.waiting.max(0) as u64,
            active: row.active.max(0) as u64,
            completed: row.completed.max(0) as u64,
            failed: row.failed.max(0) as u64,
            delayed: row.delayed.max(0) as u64,
            paused: row.paused,
        }
    }
}
