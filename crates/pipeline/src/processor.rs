//! The worker loop body: one queued job, start to finish.
//!
//! [`JobProcessor::process`] runs the attempt and returns its outcome or
//! error unchanged; it never retries. [`JobProcessor::handle`] hands that
//! result to the durable queue, whose attempt/backoff settings decide what
//! happens to a failed job next.

use std::sync::Arc;

use genq_comfyui::RenderBackend;
use genq_core::extraction::extract;
use genq_core::injection::inject;
use genq_core::job::{JobOutcome, JobRequest, SubmissionState};
use genq_core::job_events::{
    EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_INJECTION_WARNING,
};
use genq_core::progress::{
    PROGRESS_DONE, PROGRESS_EXTRACTING, PROGRESS_INJECTED, PROGRESS_STARTED,
    PROGRESS_SUBMITTED, PROGRESS_TEMPLATE_LOADED,
};
use genq_core::queue::{JobQueue, JobState, QueuedJob};
use genq_events::{EventBus, PipelineEvent};
use serde::Serialize;

use crate::error::JobError;
use crate::poller::{CompletionPoller, PollConfig};
use crate::progress::ProgressReporter;
use crate::templates::TemplateStore;

/// Serialize a job outcome for storage on the queue.
fn result_value<T: Serialize>(outcome: &T) -> Result<serde_json::Value, JobError> {
    serde_json::to_value(outcome)
        .map_err(|e| JobError::InvalidPayload(format!("result could not be serialized: {e}")))
}

/// Shared collaborators of every worker slot.
pub struct JobProcessor {
    queue: Arc<dyn JobQueue>,
    backend: Arc<dyn RenderBackend>,
    templates: Arc<dyn TemplateStore>,
    events: Arc<EventBus>,
    poll: PollConfig,
}

impl JobProcessor {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        backend: Arc<dyn RenderBackend>,
        templates: Arc<dyn TemplateStore>,
        events: Arc<EventBus>,
        poll: PollConfig,
    ) -> Self {
        Self {
            queue,
            backend,
            templates,
            events,
            poll,
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Process a claimed job and record the result on the queue.
    pub async fn handle(&self, job: QueuedJob) {
        let job_id = job.id.clone();
        tracing::info!(job_id = %job_id, attempt = job.attempts_made + 1, "Job claimed");

        let attempt = self
            .process(&job)
            .await
            .and_then(|outcome| Ok((result_value(&outcome)?, outcome)));
        match attempt {
            Ok((result, outcome)) => {
                if let Err(e) = self.queue.complete(&job_id, result).await {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to mark job completed");
                    return;
                }
                tracing::info!(
                    job_id = %job_id,
                    prompt_id = %outcome.backend_reference_id,
                    artifacts = outcome.results.artifacts.len(),
                    "Job completed",
                );
                self.events.publish(
                    PipelineEvent::new(EVENT_JOB_COMPLETED)
                        .for_job(job_id)
                        .with_payload(serde_json::json!({
                            "backend_reference_id": outcome.backend_reference_id,
                            "artifact_count": outcome.results.artifacts.len(),
                        })),
                );
            }
            Err(err) => {
                let next = match self.queue.fail(&job_id, err.to_failure()).await {
                    Ok(state) => state,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to mark job failed");
                        return;
                    }
                };
                tracing::warn!(
                    job_id = %job_id,
                    error = %err,
                    status_code = ?err.status_code(),
                    will_retry = next == JobState::Delayed,
                    "Job attempt failed",
                );
                self.events.publish(
                    PipelineEvent::new(EVENT_JOB_FAILED)
                        .for_job(job_id)
                        .with_payload(serde_json::json!({
                            "error": err.to_string(),
                            "status_code": err.status_code(),
                            "queue_state": next.as_str(),
                        })),
                );
            }
        }
    }

    /// Run one attempt of `job`. Errors propagate unchanged.
    pub async fn process(&self, job: &QueuedJob) -> Result<JobOutcome, JobError> {
        let mut reporter = ProgressReporter::new(self.queue.clone(), self.events.clone(), &job.id);
        reporter.report(PROGRESS_STARTED).await;

        let request = JobRequest::from_payload(&job.data)
            .map_err(|e| JobError::InvalidPayload(e.to_string()))?;

        let result = self.run_attempt(&request, &mut reporter).await;
        if result.is_err() {
            reporter.transition(SubmissionState::Failed);
        }
        result
    }

    async fn run_attempt(
        &self,
        request: &JobRequest,
        reporter: &mut ProgressReporter,
    ) -> Result<JobOutcome, JobError> {
        let template = self
            .templates
            .load(&request.template_name)
            .await?
            .ok_or_else(|| JobError::TemplateNotFound(request.template_name.clone()))?;
        reporter.report(PROGRESS_TEMPLATE_LOADED).await;

        let injection = inject(&template, &request.template_name, &request.parameters)?;
        for warning in &injection.warnings {
            tracing::warn!(job_id = %reporter.job_id(), warning = %warning, "Injection warning");
            self.events.publish(
                PipelineEvent::new(EVENT_JOB_INJECTION_WARNING)
                    .for_job(reporter.job_id())
                    .with_payload(serde_json::to_value(warning).unwrap_or_default()),
            );
        }
        reporter.report(PROGRESS_INJECTED).await;

        reporter.transition(SubmissionState::Submitting);
        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = self
            .backend
            .submit(&injection.workflow, &client_id)
            .await
            .map_err(JobError::from_submission)?;
        let prompt_id = submitted
            .prompt_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| JobError::BackendProtocol("submission response has no prompt_id".into()))?;
        reporter.set_backend_reference(&prompt_id);
        tracing::info!(
            job_id = %reporter.job_id(),
            prompt_id = %prompt_id,
            client_id = %client_id,
            "Workflow submitted",
        );
        reporter.report(PROGRESS_SUBMITTED).await;

        reporter.transition(SubmissionState::Polling);
        let mut poller = CompletionPoller::new(self.backend.as_ref(), self.poll);
        let outputs = poller.run(&prompt_id, reporter).await?;
        reporter.report(PROGRESS_EXTRACTING).await;

        let results = extract(outputs.as_ref(), request, self.backend.view_base_url())?;
        reporter.report(PROGRESS_DONE).await;
        reporter.transition(SubmissionState::Completed);

        Ok(JobOutcome::completed(prompt_id, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("non-finite float"))
        }
    }

    #[test]
    fn unserializable_result_is_an_error_not_null() {
        let err = result_value(&Unserializable).unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
        assert!(err.to_string().contains("non-finite float"));

        let value = result_value(&serde_json::json!({"ok": true})).unwrap();
        assert_eq!(value["ok"], true);
    }
}
