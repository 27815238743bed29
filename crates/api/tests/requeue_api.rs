//! Integration tests for the admin requeue endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post_json, TestApp};
use genq_core::queue::{JobFailure, JobQueue, JobState};
use serde_json::json;

/// Enqueue through the API and drive the job straight into the failed set.
async fn failed_job(app: &TestApp, reason: &str, status: Option<u16>) -> String {
    let created = body_json(
        post_json(
            &app.router,
            "/api/v1/jobs",
            json!({ "template_name": "text_to_image", "retry_budget": 1 }),
        )
        .await,
    )
    .await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();
    let claimed = app.queue.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, job_id);
    let state = app
        .queue
        .fail(&job_id, JobFailure::new(reason, status))
        .await
        .unwrap();
    assert_eq!(state, JobState::Failed);
    job_id
}

#[tokio::test]
async fn stats_group_failures_by_reason() {
    let app = build_test_app();
    failed_job(&app, "Polling timeout: job did not finish within 600s", None).await;
    failed_job(&app, "Template not found: upscale", None).await;

    let stats = body_json(get(&app.router, "/api/v1/admin/requeue/stats").await).await;
    assert_eq!(stats["data"]["total"], 2);
    assert_eq!(stats["data"]["by_resubmission_count"]["0"], 2);
}

#[tokio::test]
async fn dry_run_reports_without_touching_queue() {
    let app = build_test_app();
    let job_id = failed_job(&app, "Backend API error (503): busy", Some(503)).await;

    let report = body_json(
        post_json(&app.router, "/api/v1/admin/requeue", json!({ "dry_run": true })).await,
    )
    .await;
    assert_eq!(report["data"]["dry_run"], true);
    assert_eq!(report["data"]["evaluated"], 1);
    assert_eq!(report["data"]["requeued"][0]["failed_job_id"], job_id.as_str());
    assert!(report["data"]["requeued"][0]["new_job_id"].is_null());

    let counts = app.queue.counts().await.unwrap();
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.waiting + counts.delayed, 0);
}

#[tokio::test]
async fn sweep_requeues_temporary_and_keeps_permanent() {
    let app = build_test_app();
    let temporary = failed_job(&app, "Connection to backend failed: refused", None).await;
    let permanent = failed_job(&app, "Template not found: upscale", None).await;

    let report =
        body_json(post_json(&app.router, "/api/v1/admin/requeue", json!({})).await).await;
    assert_eq!(report["data"]["dry_run"], false);
    assert_eq!(report["data"]["requeued"][0]["failed_job_id"], temporary.as_str());
    assert_eq!(report["data"]["rejected"][0]["job_id"], permanent.as_str());

    let new_id = report["data"]["requeued"][0]["new_job_id"].as_str().unwrap();
    let new_job = body_json(get(&app.router, &format!("/api/v1/jobs/{new_id}")).await).await;
    assert_eq!(new_job["data"]["lineage"]["origin_job_id"], temporary.as_str());
    assert_eq!(new_job["data"]["lineage"]["resubmission_count"], 1);
    assert_eq!(new_job["data"]["priority"], 10);

    let old = get(&app.router, &format!("/api/v1/jobs/{temporary}")).await;
    assert_eq!(old.status(), StatusCode::NOT_FOUND);
    let kept = get(&app.router, &format!("/api/v1/jobs/{permanent}")).await;
    assert_eq!(kept.status(), StatusCode::OK);
}

#[tokio::test]
async fn single_job_requeue() {
    let app = build_test_app();
    let job_id = failed_job(&app, "network unreachable", None).await;

    let report = body_json(
        post_json(&app.router, &format!("/api/v1/admin/requeue/{job_id}"), json!({})).await,
    )
    .await;
    assert_eq!(report["data"]["evaluated"], 1);
    assert_eq!(report["data"]["requeued"].as_array().unwrap().len(), 1);

    let missing = post_json(&app.router, "/api/v1/admin/requeue/nope", json!({})).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
