//! Repository for the `queue_jobs` and `queue_settings` tables.
//!
//! Every state literal comes from [`JobState::as_str`]; no raw state
//! strings appear in the queries below except inside the counts query.

use std::time::Duration;

use genq_core::queue::{backoff_delay, EnqueueOptions, JobFailure, JobState};
use genq_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::queue_job::{QueueCountsRow, QueueJobRow};

/// Column list for `queue_jobs` queries.
const COLUMNS: &str = "\
    id, seq, state, priority, data, result, progress, \
    attempts_made, max_attempts, backoff_base_ms, keep_completed, keep_failed, \
    failed_reason, failed_status_code, \
    created_at, run_at, processed_at, finished_at";

/// Outcome of recording a failed attempt.
#[derive(Debug)]
pub enum FailOutcome {
    /// The job was not active; nothing was changed.
    NotActive(Option<QueueJobRow>),
    /// The job was rescheduled or moved to the failed set.
    Recorded(JobState),
}

/// Provides queue operations over Postgres.
pub struct QueueJobRepo;

impl QueueJobRepo {
    /// Insert a job. Returns `None` when the id already exists.
    pub async fn insert(
        pool: &PgPool,
        data: &serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<Option<QueueJobRow>, sqlx::Error> {
        let state = if options.delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };
        let query = format!(
            "INSERT INTO queue_jobs \
                 (id, state, priority, data, max_attempts, backoff_base_ms, \
                  keep_completed, keep_failed, run_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW() + make_interval(secs => $9)) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueJobRow>(&query)
            .bind(&options.job_id)
            .bind(state.as_str())
            .bind(options.priority)
            .bind(data)
            .bind(options.attempts.max(1) as i32)
            .bind(options.backoff_base.as_millis() as i64)
            .bind(options.keep_completed as i32)
            .bind(options.keep_failed as i32)
            .bind(options.delay.as_secs_f64())
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<QueueJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM queue_jobs WHERE id = $1");
        sqlx::query_as::<_, QueueJobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the next ready job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row. Returns `None` while the queue is paused.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<QueueJobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE queue_jobs \
             SET state = $1, progress = 0, processed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM queue_jobs \
                 WHERE state IN ($2, $3) AND run_at <= NOW() \
                   AND NOT EXISTS (SELECT 1 FROM queue_settings WHERE paused) \
                 ORDER BY priority DESC, seq ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueJobRow>(&query)
            .bind(JobState::Active.as_str())
            .bind(JobState::Waiting.as_str())
            .bind(JobState::Delayed.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Set progress on an active job. Returns `false` when no active job matched.
    pub async fn update_progress(pool: &PgPool, id: &str, percent: u8) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE queue_jobs SET progress = $2 WHERE id = $1 AND state = $3")
            .bind(id)
            .bind(percent.min(100) as i16)
            .bind(JobState::Active.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark an active job completed. Returns the keep-completed retention
    /// of the job, or `None` when no active job matched.
    pub async fn complete(
        pool: &PgPool,
        id: &str,
        result: &serde_json::Value,
    ) -> Result<Option<i32>, sqlx::Error> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE queue_jobs \
             SET state = $2, progress = 100, result = $3, finished_at = NOW() \
             WHERE id = $1 AND state = $4 \
             RETURNING keep_completed",
        )
        .bind(id)
        .bind(JobState::Completed.as_str())
        .bind(result)
        .bind(JobState::Active.as_str())
        .fetch_optional(pool)
        .await?;
        Ok(row.map(|(keep,)| keep))
    }

    /// Record a failed attempt, applying the job's attempt budget and
    /// exponential backoff inside one transaction.
    pub async fn fail(
        pool: &PgPool,
        id: &str,
        failure: &JobFailure,
    ) -> Result<FailOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!("SELECT {COLUMNS} FROM queue_jobs WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, QueueJobRow>(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let row = match row {
            Some(row) if row.state == JobState::Active.as_str() => row,
            other => return Ok(FailOutcome::NotActive(other)),
        };

        let attempts_made = row.attempts_made + 1;
        let status_code = failure.status_code.map(i32::from);
        let next_state = if attempts_made < row.max_attempts {
            let delay = backoff_delay(
                Duration::from_millis(row.backoff_base_ms.max(0) as u64),
                attempts_made as u32,
            );
            sqlx::query(
                "UPDATE queue_jobs \
                 SET state = $2, attempts_made = $3, failed_reason = $4, \
                     failed_status_code = $5, run_at = NOW() + make_interval(secs => $6) \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(JobState::Delayed.as_str())
            .bind(attempts_made)
            .bind(&failure.message)
            .bind(status_code)
            .bind(delay.as_secs_f64())
            .execute(&mut *tx)
            .await?;
            JobState::Delayed
        } else {
            sqlx::query(
                "UPDATE queue_jobs \
                 SET state = $2, attempts_made = $3, failed_reason = $4, \
                     failed_status_code = $5, finished_at = NOW() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(JobState::Failed.as_str())
            .bind(attempts_made)
            .bind(&failure.message)
            .bind(status_code)
            .execute(&mut *tx)
            .await?;
            Self::trim(&mut *tx, JobState::Failed, row.keep_failed).await?;
            JobState::Failed
        };

        tx.commit().await?;
        Ok(FailOutcome::Recorded(next_state))
    }

    /// Delete all but the newest `keep` finished jobs in `state`.
    pub async fn trim<'e, E>(executor: E, state: JobState, keep: i32) -> Result<u64, sqlx::Error>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            "DELETE FROM queue_jobs WHERE id IN ( \
                 SELECT id FROM queue_jobs WHERE state = $1 \
                 ORDER BY finished_at DESC NULLS LAST, seq DESC \
                 OFFSET $2 \
             )",
        )
        .bind(state.as_str())
        .bind(i64::from(keep.max(0)))
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn counts(pool: &PgPool) -> Result<QueueCountsRow, sqlx::Error> {
        sqlx::query_as::<_, QueueCountsRow>(
            "SELECT \
                 COUNT(*) FILTER (WHERE state IN ('waiting', 'delayed') AND run_at <= NOW()) AS waiting, \
                 COUNT(*) FILTER (WHERE state IN ('waiting', 'delayed') AND run_at > NOW()) AS delayed, \
                 COUNT(*) FILTER (WHERE state = 'active') AS active, \
                 COUNT(*) FILTER (WHERE state = 'completed') AS completed, \
                 COUNT(*) FILTER (WHERE state = 'failed') AS failed, \
                 COALESCE((SELECT paused FROM queue_settings LIMIT 1), FALSE) AS paused \
             FROM queue_jobs",
        )
        .fetch_one(pool)
        .await
    }

    pub async fn list_by_state(
        pool: &PgPool,
        state: JobState,
    ) -> Result<Vec<QueueJobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM queue_jobs WHERE state = $1 ORDER BY seq ASC");
        sqlx::query_as::<_, QueueJobRow>(&query)
            .bind(state.as_str())
            .fetch_all(pool)
            .await
    }

    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM queue_jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete jobs in `state` that finished at or before `cutoff`.
    pub async fn delete_finished_before(
        pool: &PgPool,
        state: JobState,
        cutoff: Timestamp,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "DELETE FROM queue_jobs \
             WHERE state = $1 AND COALESCE(finished_at, created_at) <= $2 \
             RETURNING id",
        )
        .bind(state.as_str())
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Try to take a transaction-scoped advisory lock on `key`. The lock
    /// is held until the transaction owning `conn` ends.
    pub async fn try_advisory_xact_lock(
        conn: &mut sqlx::PgConnection,
        key: i64,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(conn)
            .await
    }

    pub async fn set_paused(pool: &PgPool, paused: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE queue_settings SET paused = $1")
            .bind(paused)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn is_paused(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let row: Option<(bool,)> = sqlx::query_as("SELECT paused FROM queue_settings LIMIT 1")
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some_and(|(paused,)| paused))
    }
}
