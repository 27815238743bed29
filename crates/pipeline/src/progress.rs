//! Fire-and-forget progress reporting for one processing attempt.
//!
//! [`ProgressReporter`] owns the attempt's [`SubmittedJob`], enforces
//! monotonic progress, and mirrors every change into the durable queue
//! and onto the event bus. Reporting failures are logged and swallowed:
//! losing a progress update must never abort the job.

use std::sync::Arc;

use genq_core::job::{SubmissionState, SubmittedJob};
use genq_core::job_events::{EVENT_JOB_PROGRESS, EVENT_JOB_STATE_CHANGED};
use genq_core::queue::JobQueue;
use genq_events::{EventBus, PipelineEvent};

pub struct ProgressReporter {
    queue: Arc<dyn JobQueue>,
    events: Arc<EventBus>,
    job: SubmittedJob,
}

impl ProgressReporter {
    pub fn new(queue: Arc<dyn JobQueue>, events: Arc<EventBus>, job_id: &str) -> Self {
        Self {
            queue,
            events,
            job: SubmittedJob::new(job_id),
        }
    }

    pub fn job(&self) -> &SubmittedJob {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.local_job_id
    }

    pub fn set_backend_reference(&mut self, prompt_id: &str) {
        self.job.backend_reference_id = Some(prompt_id.to_string());
    }

    /// Raise progress to `percent`. Lower or equal values are dropped.
    pub async fn report(&mut self, percent: u8) {
        if !self.job.advance(percent) {
            return;
        }
        let percent = self.job.progress();

        if let Err(e) = self.queue.update_progress(&self.job.local_job_id, percent).await {
            tracing::warn!(
                job_id = %self.job.local_job_id,
                percent,
                error = %e,
                "Failed to record job progress",
            );
        }

        self.events.publish(
            PipelineEvent::new(EVENT_JOB_PROGRESS)
                .for_job(self.job.local_job_id.clone())
                .with_payload(serde_json::json!({ "percent": percent })),
        );
    }

    /// Move the attempt to `state`. Illegal transitions are ignored.
    pub fn transition(&mut self, state: SubmissionState) {
        let from = self.job.state();
        if !self.job.transition(state) {
            tracing::debug!(
                job_id = %self.job.local_job_id,
                from = from.as_str(),
                to = state.as_str(),
                "Ignoring submission state transition",
            );
            return;
        }
        tracing::debug!(
            job_id = %self.job.local_job_id,
            state = state.as_str(),
            "Submission state changed",
        );
        self.events.publish(
            PipelineEvent::new(EVENT_JOB_STATE_CHANGED)
                .for_job(self.job.local_job_id.clone())
                .with_payload(serde_json::json!({
                    "from": from.as_str(),
                    "state": state.as_str(),
                    "backend_reference_id": self.job.backend_reference_id,
                })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genq_core::memory_queue::MemoryJobQueue;
    use genq_core::queue::EnqueueOptions;

    #[tokio::test]
    async fn progress_is_monotonic_and_published() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue
            .enqueue(serde_json::json!({}), EnqueueOptions::new("j1"))
            .await
            .unwrap();
        queue.claim_next().await.unwrap();

        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let mut reporter = ProgressReporter::new(queue.clone(), bus.clone(), "j1");

        reporter.report(30).await;
        reporter.report(20).await;
        reporter.report(50).await;

        assert_eq!(reporter.job().progress(), 50);
        assert_eq!(queue.get("j1").await.unwrap().unwrap().progress, 50);
        let published: Vec<i64> = genq_events::bus::drain(&mut rx)
            .iter()
            .map(|e| e.payload["percent"].as_i64().unwrap())
            .collect();
        assert_eq!(published, [30, 50]);
    }

    #[tokio::test]
    async fn queue_errors_do_not_propagate() {
        // The job was never enqueued, so every queue update fails.
        let queue = Arc::new(MemoryJobQueue::new());
        let bus = Arc::new(EventBus::default());
        let mut reporter = ProgressReporter::new(queue, bus, "ghost");
        reporter.report(10).await;
        assert_eq!(reporter.job().progress(), 10);
    }
}
