mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{fast_poll, request, Harness, ScriptedBackend, Step, SubmitBehavior, VIEW_BASE};
use genq_core::job_events::{EVENT_JOB_FAILED, EVENT_JOB_PROGRESS};
use genq_core::queue::{JobQueue, JobState};
use genq_events::bus::drain;
use genq_pipeline::{JobError, TemplateStore, WorkerPool};
use tokio_util::sync::CancellationToken;

fn progress_values(events: &[genq_events::PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter(|e| e.event_type == EVENT_JOB_PROGRESS)
        .map(|e| e.payload["percent"].as_u64().unwrap() as u8)
        .collect()
}

#[tokio::test]
async fn completes_on_the_last_allowed_poll() {
    let h = Harness::new(ScriptedBackend::completes_after(119), fast_poll(120));
    let mut rx = h.events.subscribe();
    let job = h.claim(&request("text_to_image")).await;

    let outcome = h.processor.process(&job).await.unwrap();

    assert_eq!(h.backend.status_calls(), 120);
    assert_eq!(outcome.status, "completed");
    assert_eq!(outcome.backend_reference_id, "prompt-1");
    assert_eq!(outcome.results.artifacts.len(), 1);
    let artifact = &outcome.results.artifacts[0];
    assert_eq!(artifact.producing_node, "9");
    assert!(artifact.location.starts_with(VIEW_BASE));

    let progress = progress_values(&drain(&mut rx));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last(), Some(&100));
    let polling: Vec<u8> = progress
        .iter()
        .copied()
        .filter(|p| *p > 50 && *p < 90)
        .collect();
    assert!(!polling.is_empty());
    assert!(polling.iter().all(|p| *p <= 89));
}

#[tokio::test]
async fn never_completing_backend_times_out() {
    let h = Harness::new(ScriptedBackend::new(Vec::new(), Step::Running), fast_poll(120));
    let job = h.claim(&request("text_to_image")).await;

    let err = h.processor.process(&job).await.unwrap_err();
    assert_matches!(err, JobError::PollTimeout { .. });
    assert!(err.to_string().starts_with("Polling timeout"));
    assert_eq!(h.backend.status_calls(), 120);
}

#[tokio::test]
async fn absent_history_counts_as_running() {
    let h = Harness::new(
        ScriptedBackend::new(
            vec![Step::Pending, Step::Pending, Step::Completed(common::sample_outputs())],
            Step::Pending,
        ),
        fast_poll(10),
    );
    let job = h.claim(&request("text_to_image")).await;
    assert!(h.processor.process(&job).await.is_ok());
    assert_eq!(h.backend.status_calls(), 3);
}

#[tokio::test]
async fn remote_error_carries_backend_message() {
    let h = Harness::new(
        ScriptedBackend::new(vec![Step::Running, Step::Error("CUDA out of memory")], Step::Running),
        fast_poll(10),
    );
    let job = h.claim(&request("text_to_image")).await;

    let err = h.processor.process(&job).await.unwrap_err();
    assert_matches!(err, JobError::RemoteExecution { ref message } if message == "CUDA out of memory");
}

#[tokio::test]
async fn transient_query_errors_are_retried() {
    let h = Harness::new(
        ScriptedBackend::new(
            vec![
                Step::QueryFails(502),
                Step::QueryFails(503),
                Step::Completed(common::sample_outputs()),
            ],
            Step::Running,
        ),
        fast_poll(5),
    );
    let job = h.claim(&request("text_to_image")).await;
    assert!(h.processor.process(&job).await.is_ok());
}

#[tokio::test]
async fn exhausted_query_errors_surface_the_last_error() {
    let h = Harness::new(ScriptedBackend::new(Vec::new(), Step::QueryFails(503)), fast_poll(4));
    let job = h.claim(&request("text_to_image")).await;

    let err = h.processor.process(&job).await.unwrap_err();
    assert_matches!(err, JobError::StatusQuery { status: Some(503), .. });
    assert!(err.to_string().starts_with("Failed to check job status"));
    assert_eq!(h.backend.status_calls(), 4);
}

#[tokio::test]
async fn rejected_submission_keeps_status_code() {
    let h = Harness::new(
        ScriptedBackend::completes_after(0).with_submit(SubmitBehavior::Reject(503)),
        fast_poll(5),
    );
    let job = h.claim(&request("text_to_image")).await;

    let err = h.processor.process(&job).await.unwrap_err();
    assert_matches!(err, JobError::BackendSubmission { status: 503, .. });
    assert_eq!(h.backend.status_calls(), 0);
}

#[tokio::test]
async fn submission_without_prompt_id_is_a_protocol_error() {
    let h = Harness::new(
        ScriptedBackend::completes_after(0).with_submit(SubmitBehavior::NoPromptId),
        fast_poll(5),
    );
    let job = h.claim(&request("text_to_image")).await;
    assert_matches!(
        h.processor.process(&job).await,
        Err(JobError::BackendProtocol(_))
    );
}

#[tokio::test]
async fn unknown_template_is_reported_by_name() {
    let h = Harness::new(ScriptedBackend::completes_after(0), fast_poll(5));
    let job = h.claim(&request("does_not_exist")).await;
    assert_matches!(
        h.processor.process(&job).await,
        Err(JobError::TemplateNotFound(name)) if name == "does_not_exist"
    );
    assert!(h.backend.submitted().is_empty());
}

#[tokio::test]
async fn empty_outputs_fail_extraction() {
    let h = Harness::new(
        ScriptedBackend::new(vec![Step::Completed(serde_json::Value::Null)], Step::Running),
        fast_poll(5),
    );
    let job = h.claim(&request("text_to_image")).await;
    assert_matches!(h.processor.process(&job).await, Err(JobError::EmptyOutput));
}

#[tokio::test]
async fn injection_never_mutates_the_stored_template() {
    let h = Harness::new(ScriptedBackend::completes_after(0), fast_poll(5));
    let before = h.templates.load("text_to_image").await.unwrap().unwrap();
    let job = h.claim(&request("text_to_image")).await;
    h.processor.process(&job).await.unwrap();

    let after = h.templates.load("text_to_image").await.unwrap().unwrap();
    assert_eq!(before, after);

    let (workflow, client_id) = h.backend.submitted().remove(0);
    assert_eq!(workflow["6"]["inputs"]["text"], "a lighthouse at dusk");
    assert_eq!(workflow["3"]["inputs"]["seed"], 42);
    assert!(!client_id.is_empty());
}

#[tokio::test]
async fn handle_records_outcomes_on_the_queue() {
    let h = Harness::new(ScriptedBackend::completes_after(2), fast_poll(5));
    let job = h.claim(&request("text_to_image")).await;
    h.processor.handle(job).await;

    let stored = h.queue.get("job-1").await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Completed);
    assert_eq!(stored.progress, 100);
    assert_eq!(
        stored.result.unwrap()["results"]["artifacts"][0]["identifier"],
        "genq_00001_.png"
    );
}

#[tokio::test]
async fn handle_records_failures_with_status_code() {
    let h = Harness::new(
        ScriptedBackend::completes_after(0).with_submit(SubmitBehavior::Reject(502)),
        fast_poll(5),
    );
    let mut rx = h.events.subscribe();
    let job = h.claim(&request("text_to_image")).await;
    h.processor.handle(job).await;

    let failed = h.queue.failed_jobs().await.unwrap();
    assert_eq!(failed.len(), 1);
    let failure = failed[0].failure.clone().unwrap();
    assert_eq!(failure.status_code, Some(502));
    assert_eq!(failure.message, "Backend API error (502): rejected");
    assert!(drain(&mut rx).iter().any(|e| e.event_type == EVENT_JOB_FAILED));
}

#[tokio::test]
async fn pool_drains_queue_and_stops_on_cancel() {
    let h = Harness::new(ScriptedBackend::new(Vec::new(), Step::Completed(common::sample_outputs())), fast_poll(5));
    for i in 0..4 {
        h.queue
            .enqueue(
                request("text_to_image").to_payload(),
                genq_core::queue::EnqueueOptions::new(format!("job-{i}")),
            )
            .await
            .unwrap();
    }

    let cancel = CancellationToken::new();
    let pool = WorkerPool::new(h.processor.clone(), 3).with_idle_interval(Duration::from_millis(5));
    let run = {
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(cancel).await })
    };

    let queue = Arc::clone(&h.queue);
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            if queue.counts().await.unwrap().completed == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all jobs should complete");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("pool should stop")
        .unwrap();
}
