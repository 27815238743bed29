//! Requeue sweep: applies the classification policy to the failed set.
//!
//! The decision itself is [`genq_core::requeue::decide`]; this module does
//! the queue I/O around it. For an accepted job the new request is enqueued
//! first and the failed entry removed afterwards. The two steps are not
//! atomic: a crash in between leaves both entries, and the lineage on the
//! new job identifies the duplicate.
//!
//! Sweeps must not overlap, or the same failed job could be resubmitted
//! twice. [`RequeueSweeper`] holds the queue-wide sweep lock
//! ([`JobQueue::try_lock_sweep`]) for the duration of a sweep and fails fast
//! with [`SweepError::AlreadyRunning`] when another sweeper, in any process
//! sharing the queue, has it. Resubmitted jobs also get an id derived from
//! their lineage, so enqueueing the same resubmission twice is a no-op and
//! a failed entry left behind by a failed removal is picked up again
//! without multiplying the lineage.

use std::sync::Arc;

use chrono::Utc;
use genq_core::job_events::{
    EVENT_REQUEUE_ACCEPTED, EVENT_REQUEUE_REJECTED, EVENT_REQUEUE_SKIPPED,
    EVENT_REQUEUE_SWEEP_COMPLETED,
};
use genq_core::queue::{JobQueue, QueueError, QueuedJob, SweepLease, SweepLock};
use genq_core::requeue::{
    decide, failed_set_stats, FailedSetStats, FailureRecord, RequeuePolicy, Transition,
};
use genq_core::types::JobId;
use genq_events::{EventBus, PipelineEvent};
use serde::Serialize;

use crate::producer::Producer;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("A requeue sweep is already running")]
    AlreadyRunning,

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequeuedJob {
    pub failed_job_id: JobId,
    /// Id of the new job; `None` in dry-run reports.
    pub new_job_id: Option<JobId>,
    pub reason: &'static str,
    pub resubmission_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedJob {
    pub job_id: JobId,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedJob {
    pub job_id: JobId,
    pub error: String,
}

/// What a sweep did (or, in dry-run mode, would do).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub evaluated: usize,
    pub requeued: Vec<RequeuedJob>,
    pub rejected: Vec<RejectedJob>,
    pub skipped: Vec<SkippedJob>,
}

pub struct RequeueSweeper {
    queue: Arc<dyn JobQueue>,
    producer: Arc<Producer>,
    events: Arc<EventBus>,
    policy: RequeuePolicy,
}

impl RequeueSweeper {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        producer: Arc<Producer>,
        events: Arc<EventBus>,
        policy: RequeuePolicy,
    ) -> Self {
        Self {
            queue,
            producer,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> &RequeuePolicy {
        &self.policy
    }

    /// Evaluate every job in the failed set and resubmit the accepted ones.
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let lock = self.lock().await?;
        let result = match self.queue.failed_jobs().await {
            Ok(failed) => Ok(self.evaluate_all(&failed, false).await),
            Err(e) => Err(SweepError::from(e)),
        };
        SweepLease::release(lock).await;

        let report = result?;
        self.finish(&report);
        Ok(report)
    }

    /// Evaluate the failed set without touching the queue.
    pub async fn dry_run(&self) -> Result<SweepReport, SweepError> {
        let failed = self.queue.failed_jobs().await?;
        Ok(self.evaluate_all(&failed, true).await)
    }

    /// Evaluate and, if accepted, resubmit a single failed job.
    pub async fn requeue_one(&self, job_id: &str) -> Result<SweepReport, SweepError> {
        let lock = self.lock().await?;
        let result = match self.queue.get(job_id).await {
            Ok(Some(job)) => Ok(self.evaluate_all(std::slice::from_ref(&job), false).await),
            Ok(None) => Err(SweepError::NotFound(job_id.to_string())),
            Err(e) => Err(SweepError::from(e)),
        };
        SweepLease::release(lock).await;

        let report = result?;
        self.finish(&report);
        Ok(report)
    }

    async fn lock(&self) -> Result<SweepLock, SweepError> {
        self.queue
            .try_lock_sweep()
            .await?
            .ok_or(SweepError::AlreadyRunning)
    }

    /// Aggregate statistics over the current failed set.
    pub async fn stats(&self) -> Result<FailedSetStats, SweepError> {
        let failed = self.queue.failed_jobs().await?;
        Ok(failed_set_stats(&failed, Utc::now()))
    }

    async fn evaluate_all(&self, failed: &[QueuedJob], dry_run: bool) -> SweepReport {
        let mut report = SweepReport {
            dry_run,
            ..Default::default()
        };
        let now = Utc::now();

        for job in failed {
            report.evaluated += 1;

            let record = match FailureRecord::from_queued(job) {
                Ok(record) => record,
                Err(e) => {
                    self.skip(&mut report, &job.id, e.to_string());
                    continue;
                }
            };

            match decide(&record, &self.policy, now) {
                Transition::Rejected { reason } => {
                    tracing::debug!(job_id = %job.id, reason, "Requeue rejected");
                    self.events.publish(
                        PipelineEvent::new(EVENT_REQUEUE_REJECTED)
                            .for_job(job.id.clone())
                            .with_payload(serde_json::json!({
                                "reason": reason,
                                "failed_reason": record.reason_text,
                            })),
                    );
                    report.rejected.push(RejectedJob {
                        job_id: job.id.clone(),
                        reason,
                    });
                }
                Transition::Accepted {
                    reason,
                    new_request,
                    delay,
                } => {
                    let resubmission_count = new_request.resubmission_count();
                    if dry_run {
                        report.requeued.push(RequeuedJob {
                            failed_job_id: job.id.clone(),
                            new_job_id: None,
                            reason,
                            resubmission_count,
                        });
                        continue;
                    }

                    let new_job = match self.producer.enqueue_delayed(new_request, delay).await {
                        Ok(new_job) => new_job,
                        Err(e) => {
                            self.skip(&mut report, &job.id, format!("resubmission failed: {e}"));
                            continue;
                        }
                    };
                    match self.queue.remove(&job.id).await {
                        Ok(true) => {}
                        Ok(false) => tracing::warn!(
                            job_id = %job.id,
                            new_job_id = %new_job.id,
                            "Failed job disappeared before removal",
                        ),
                        Err(e) => {
                            self.skip(
                                &mut report,
                                &job.id,
                                format!(
                                    "resubmitted as {} but the failed entry could not be removed: {e}",
                                    new_job.id
                                ),
                            );
                            continue;
                        }
                    }

                    tracing::info!(
                        job_id = %job.id,
                        new_job_id = %new_job.id,
                        reason,
                        resubmission_count,
                        "Failed job requeued",
                    );
                    self.events.publish(
                        PipelineEvent::new(EVENT_REQUEUE_ACCEPTED)
                            .for_job(job.id.clone())
                            .with_payload(serde_json::json!({
                                "reason": reason,
                                "new_job_id": new_job.id,
                                "resubmission_count": resubmission_count,
                            })),
                    );
                    report.requeued.push(RequeuedJob {
                        failed_job_id: job.id.clone(),
                        new_job_id: Some(new_job.id),
                        reason,
                        resubmission_count,
                    });
                }
            }
        }

        report
    }

    fn skip(&self, report: &mut SweepReport, job_id: &str, error: String) {
        tracing::warn!(job_id = %job_id, error = %error, "Skipping failed job during requeue sweep");
        self.events.publish(
            PipelineEvent::new(EVENT_REQUEUE_SKIPPED)
                .for_job(job_id)
                .with_payload(serde_json::json!({ "error": error })),
        );
        report.skipped.push(SkippedJob {
            job_id: job_id.to_string(),
            error,
        });
    }

    fn finish(&self, report: &SweepReport) {
        tracing::info!(
            evaluated = report.evaluated,
            requeued = report.requeued.len(),
            rejected = report.rejected.len(),
            skipped = report.skipped.len(),
            "Requeue sweep completed",
        );
        self.events.publish(
            PipelineEvent::new(EVENT_REQUEUE_SWEEP_COMPLETED).with_payload(serde_json::json!({
                "evaluated": report.evaluated,
                "requeued": report.requeued.len(),
                "rejected": report.rejected.len(),
                "skipped": report.skipped.len(),
            })),
        );
    }
}
