//! Producer: puts job requests on the durable queue and answers queries
//! about them.
//!
//! Job ids have the form `<template>-<unix millis>-<8 hex chars>`, so a
//! job can be traced back to its template and submission time from the id
//! alone. Resubmissions are the exception: they are named
//! `<origin id>-r<count>` so that enqueueing the same resubmission twice
//! lands on one queue entry. All queries read the queue live; nothing is
//! cached here.

use std::sync::Arc;
use std::time::Duration;

use genq_core::error::CoreError;
use genq_core::job::{JobOutcome, JobRequest, Lineage};
use genq_core::job_events::{
    EVENT_JOB_ENQUEUED, EVENT_QUEUE_CLEANED, EVENT_QUEUE_PAUSED, EVENT_QUEUE_RESUMED,
};
use genq_core::queue::{EnqueueOptions, JobQueue, JobState, QueueCounts, QueueError, QueuedJob};
use genq_core::types::{JobId, Timestamp};
use genq_events::{EventBus, PipelineEvent};
use serde::Serialize;

use crate::templates::{TemplateStore, TemplateStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error(transparent)]
    Template(#[from] TemplateStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Caller-facing view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub priority: i32,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub template_name: Option<String>,
    pub requester_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Lineage>,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl From<QueuedJob> for JobStatusView {
    fn from(job: QueuedJob) -> Self {
        let request = JobRequest::from_payload(&job.data).ok();
        let result = job
            .result
            .as_ref()
            .and_then(|r| serde_json::from_value::<JobOutcome>(r.clone()).ok());
        // A delayed job with a failure is between attempts; show its last error too.
        let error = job.failure.as_ref().map(|f| f.message.clone());
        Self {
            job_id: job.id,
            state: job.state,
            progress: job.progress,
            priority: job.priority,
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
            template_name: request.as_ref().map(|r| r.template_name.clone()),
            requester_id: request.as_ref().and_then(|r| r.requester_id.clone()),
            result,
            error,
            lineage: request.and_then(|r| r.lineage),
            created_at: job.created_at,
            finished_at: job.finished_at,
        }
    }
}

/// Generate a queue id for a request on `template_name`.
pub fn generate_job_id(template_name: &str, at: Timestamp) -> JobId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", template_name, at.timestamp_millis(), &suffix[..8])
}

/// Queue id for `request`: derived from its lineage when it is a
/// resubmission, freshly generated otherwise.
pub fn job_id_for(request: &JobRequest) -> JobId {
    match &request.lineage {
        Some(lineage) => format!("{}-r{}", lineage.origin_job_id, lineage.resubmission_count),
        None => generate_job_id(&request.template_name, request.submitted_at),
    }
}

pub struct Producer {
    queue: Arc<dyn JobQueue>,
    events: Arc<EventBus>,
    templates: Option<Arc<dyn TemplateStore>>,
}

impl Producer {
    pub fn new(queue: Arc<dyn JobQueue>, events: Arc<EventBus>) -> Self {
        Self {
            queue,
            events,
            templates: None,
        }
    }

    /// Reject requests whose template is missing from `templates`.
    pub fn with_template_check(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Enqueue a request for immediate processing.
    pub async fn enqueue(&self, request: JobRequest) -> Result<QueuedJob, ProducerError> {
        self.enqueue_delayed(request, Duration::ZERO).await
    }

    /// Enqueue a request that becomes claimable after `delay`.
    pub async fn enqueue_delayed(
        &self,
        request: JobRequest,
        delay: Duration,
    ) -> Result<QueuedJob, ProducerError> {
        request.validate()?;
        if let Some(templates) = &self.templates {
            if templates.load(&request.template_name).await?.is_none() {
                return Err(ProducerError::UnknownTemplate(request.template_name));
            }
        }

        let options = EnqueueOptions {
            priority: request.priority,
            delay,
            attempts: request.retry_budget,
            ..EnqueueOptions::new(job_id_for(&request))
        };
        let job = self.queue.enqueue(request.to_payload(), options).await?;

        tracing::info!(
            job_id = %job.id,
            template = %request.template_name,
            priority = job.priority,
            delay_ms = delay.as_millis() as u64,
            resubmission = request.resubmission_count(),
            "Job enqueued",
        );
        self.events.publish(
            PipelineEvent::new(EVENT_JOB_ENQUEUED)
                .for_job(job.id.clone())
                .with_payload(serde_json::json!({
                    "template_name": request.template_name,
                    "priority": job.priority,
                    "resubmission_count": request.resubmission_count(),
                })),
        );
        Ok(job)
    }

    pub async fn counts(&self) -> Result<QueueCounts, ProducerError> {
        Ok(self.queue.counts().await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobStatusView>, ProducerError> {
        Ok(self.queue.get(id).await?.map(JobStatusView::from))
    }

    pub async fn pause(&self) -> Result<(), ProducerError> {
        self.queue.pause().await?;
        tracing::info!("Queue paused");
        self.events.publish(PipelineEvent::new(EVENT_QUEUE_PAUSED));
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ProducerError> {
        self.queue.resume().await?;
        tracing::info!("Queue resumed");
        self.events.publish(PipelineEvent::new(EVENT_QUEUE_RESUMED));
        Ok(())
    }

    /// Remove `state` entries that finished more than `grace` ago.
    pub async fn clean(&self, grace: Duration, state: JobState) -> Result<Vec<JobId>, ProducerError> {
        if !state.is_finished() {
            return Err(CoreError::Validation(format!(
                "only completed or failed jobs can be cleaned, not {state}"
            ))
            .into());
        }
        let removed = self.queue.clean(grace, state).await?;
        tracing::info!(state = %state, grace_secs = grace.as_secs(), removed = removed.len(), "Queue cleaned");
        self.events.publish(PipelineEvent::new(EVENT_QUEUE_CLEANED).with_payload(
            serde_json::json!({
                "state": state.as_str(),
                "grace_secs": grace.as_secs(),
                "removed": removed.len(),
            }),
        ));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use genq_core::memory_queue::MemoryJobQueue;
    use genq_core::queue::JobFailure;
    use serde_json::json;

    use crate::templates::MemoryTemplateStore;

    fn producer() -> (Producer, Arc<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::new());
        let producer = Producer::new(queue.clone(), Arc::new(EventBus::default()));
        (producer, queue)
    }

    fn request(template: &str) -> JobRequest {
        JobRequest::new(
            template,
            BTreeMap::from([("prompt".to_string(), json!("a cat"))]),
            Some("user-1".into()),
        )
    }

    #[test]
    fn job_id_embeds_template_and_time() {
        let at = chrono::DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let id = generate_job_id("text_to_image", at);
        assert!(id.starts_with("text_to_image-1700000000123-"));
        assert_eq!(id.len(), "text_to_image-1700000000123-".len() + 8);
    }

    #[tokio::test]
    async fn resubmission_ids_follow_lineage() {
        let (producer, queue) = producer();
        let mut req = request("text_to_image");
        req.lineage = Some(Lineage {
            origin_job_id: "text_to_image-1-abcd0123".into(),
            resubmission_count: 2,
            requeue_timestamp: chrono::Utc::now(),
        });
        assert_eq!(job_id_for(&req), "text_to_image-1-abcd0123-r2");

        let first = producer.enqueue(req.clone()).await.unwrap();
        let again = producer.enqueue(req).await.unwrap();
        assert_eq!(first.id, "text_to_image-1-abcd0123-r2");
        assert_eq!(again.id, first.id);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn out_of_range_offsets_are_rejected() {
        let (producer, queue) = producer();
        assert_matches!(
            producer
                .enqueue_delayed(request("text_to_image"), Duration::from_millis(u64::MAX))
                .await,
            Err(ProducerError::Queue(QueueError::OutOfRange { what: "delay", .. }))
        );
        assert_eq!(queue.len().await, 0);
        assert_matches!(
            producer
                .clean(Duration::from_secs(u64::MAX / 2), JobState::Completed)
                .await,
            Err(ProducerError::Queue(QueueError::OutOfRange { what: "grace period", .. }))
        );
    }

    #[tokio::test]
    async fn enqueue_uses_request_priority_and_budget() {
        let (producer, queue) = producer();
        let mut req = request("text_to_image").with_priority(5);
        req.retry_budget = 2;
        let job = producer.enqueue(req).await.unwrap();

        let stored = queue.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.priority, 5);
        assert_eq!(stored.max_attempts, 2);
        assert_eq!(producer.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let (producer, _) = producer();
        assert_matches!(
            producer.enqueue(request("  ")).await,
            Err(ProducerError::Validation(_))
        );
    }

    #[tokio::test]
    async fn template_check_rejects_unknown_templates() {
        let (producer, _) = producer();
        let store = MemoryTemplateStore::new().with_template("upscale", json!({}));
        let producer = producer.with_template_check(Arc::new(store));

        assert!(producer.enqueue(request("upscale")).await.is_ok());
        assert_matches!(
            producer.enqueue(request("nope")).await,
            Err(ProducerError::UnknownTemplate(name)) if name == "nope"
        );
    }

    #[tokio::test]
    async fn status_view_reports_failure_and_request_fields() {
        let (producer, queue) = producer();
        let mut req = request("text_to_image");
        req.retry_budget = 1;
        let job = producer.enqueue(req).await.unwrap();
        queue.claim_next().await.unwrap();
        queue
            .fail(&job.id, JobFailure::new("Polling timeout: 600s", None))
            .await
            .unwrap();

        let view = producer.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(view.state, JobState::Failed);
        assert_eq!(view.error.as_deref(), Some("Polling timeout: 600s"));
        assert_eq!(view.template_name.as_deref(), Some("text_to_image"));
        assert_eq!(view.requester_id.as_deref(), Some("user-1"));
        assert!(producer.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clean_refuses_unfinished_states() {
        let (producer, _) = producer();
        assert_matches!(
            producer.clean(Duration::ZERO, JobState::Active).await,
            Err(ProducerError::Validation(_))
        );
        assert!(producer
            .clean(Duration::ZERO, JobState::Completed)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn pause_and_resume_toggle_intake() {
        let (producer, _) = producer();
        producer.pause().await.unwrap();
        assert!(producer.counts().await.unwrap().paused);
        producer.resume().await.unwrap();
        assert!(!producer.counts().await.unwrap().paused);
    }
}
