//! Postgres implementation of the [`JobQueue`] seam.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use genq_core::queue::{
    check_schedule_offset, clean_cutoff, EnqueueOptions, JobFailure, JobQueue, JobState,
    QueueCounts, QueueError, QueuedJob, SweepLease, SweepLock,
};
use genq_core::types::JobId;

use crate::models::queue_job::QueueJobRow;
use crate::repositories::queue_job_repo::FailOutcome;
use crate::repositories::QueueJobRepo;
use crate::DbPool;

/// Advisory lock key serializing requeue sweeps across processes.
const SWEEP_LOCK_KEY: i64 = 0x6765_6e71_7377_6570;

/// Durable queue stored in the `queue_jobs` table.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Build the error for an operation that requires an active job.
    async fn not_active(&self, id: &str, row: Option<QueueJobRow>) -> QueueError {
        let row = match row {
            Some(row) => Some(row),
            None => QueueJobRepo::find_by_id(&self.pool, id).await.ok().flatten(),
        };
        match row.map(|r| r.job_state()) {
            Some(Ok(state)) => QueueError::InvalidState {
                id: id.to_string(),
                state,
                expected: JobState::Active,
            },
            Some(Err(e)) => e,
            None => QueueError::NotFound(id.to_string()),
        }
    }
}

fn storage(e: sqlx::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}

/// Sweep lock held by an open transaction; ending it frees the lock.
struct PgSweepLease {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl SweepLease for PgSweepLease {
    async fn release(self: Box<Self>) {
        if let Err(e) = self.tx.rollback().await {
            tracing::warn!(error = %e, "Failed to release requeue sweep lock");
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(
        &self,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueuedJob, QueueError> {
        check_schedule_offset("delay", options.delay)?;
        if let Some(row) = QueueJobRepo::insert(&self.pool, &data, &options)
            .await
            .map_err(storage)?
        {
            return row.try_into();
        }
        // The id already exists; return the stored entry unchanged.
        QueueJobRepo::find_by_id(&self.pool, &options.job_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| QueueError::NotFound(options.job_id.clone()))?
            .try_into()
    }

    async fn claim_next(&self) -> Result<Option<QueuedJob>, QueueError> {
        QueueJobRepo::claim_next(&self.pool)
            .await
            .map_err(storage)?
            .map(QueuedJob::try_from)
            .transpose()
    }

    async fn update_progress(&self, id: &str, percent: u8) -> Result<(), QueueError> {
        if QueueJobRepo::update_progress(&self.pool, id, percent)
            .await
            .map_err(storage)?
        {
            return Ok(());
        }
        Err(self.not_active(id, None).await)
    }

    async fn complete(&self, id: &str, result: serde_json::Value) -> Result<(), QueueError> {
        let Some(keep) = QueueJobRepo::complete(&self.pool, id, &result)
            .await
            .map_err(storage)?
        else {
            return Err(self.not_active(id, None).await);
        };
        QueueJobRepo::trim(&self.pool, JobState::Completed, keep)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn fail(&self, id: &str, failure: JobFailure) -> Result<JobState, QueueError> {
        match QueueJobRepo::fail(&self.pool, id, &failure)
            .await
            .map_err(storage)?
        {
            FailOutcome::Recorded(state) => Ok(state),
            FailOutcome::NotActive(row) => Err(self.not_active(id, row).await),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedJob>, QueueError> {
        QueueJobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(storage)?
            .map(QueuedJob::try_from)
            .transpose()
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(QueueJobRepo::counts(&self.pool).await.map_err(storage)?.into())
    }

    async fn failed_jobs(&self) -> Result<Vec<QueuedJob>, QueueError> {
        QueueJobRepo::list_by_state(&self.pool, JobState::Failed)
            .await
            .map_err(storage)?
            .into_iter()
            .map(QueuedJob::try_from)
            .collect()
    }

    async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        QueueJobRepo::delete(&self.pool, id).await.map_err(storage)
    }

    async fn pause(&self) -> Result<(), QueueError> {
        QueueJobRepo::set_paused(&self.pool, true).await.map_err(storage)
    }

    async fn resume(&self) -> Result<(), QueueError> {
        QueueJobRepo::set_paused(&self.pool, false).await.map_err(storage)
    }

    async fn is_paused(&self) -> Result<bool, QueueError> {
        QueueJobRepo::is_paused(&self.pool).await.map_err(storage)
    }

    async fn clean(&self, grace: Duration, state: JobState) -> Result<Vec<JobId>, QueueError> {
        let cutoff = clean_cutoff(Utc::now(), grace)?;
        QueueJobRepo::delete_finished_before(&self.pool, state, cutoff)
            .await
            .map_err(storage)
    }

    async fn try_lock_sweep(&self) -> Result<Option<SweepLock>, QueueError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        if !QueueJobRepo::try_advisory_xact_lock(&mut tx, SWEEP_LOCK_KEY)
            .await
            .map_err(storage)?
        {
            return Ok(None);
        }
        Ok(Some(Box::new(PgSweepLease { tx })))
    }
}
