#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Method, Request};
use axum::response::Response;
use axum::Router;
use genq_api::config::ServerConfig;
use genq_api::router::build_app_router;
use genq_api::state::AppState;
use genq_core::memory_queue::MemoryJobQueue;
use genq_core::requeue::RequeuePolicy;
use genq_events::EventBus;
use genq_pipeline::{MemoryTemplateStore, Producer, RequeueSweeper};
use http_body_util::BodyExt;
use tower::ServiceExt;

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec![HeaderValue::from_static("http://localhost:5173")],
        request_timeout_secs: 30,
        database_url: String::new(),
        templates_dir: None,
        requeue: RequeuePolicy::default(),
        json_logs: false,
    }
}

/// Application over an in-memory queue. The template store knows
/// `text_to_image` only.
pub struct TestApp {
    pub router: Router,
    pub queue: Arc<MemoryJobQueue>,
}

pub fn build_test_app() -> TestApp {
    let config = test_config();
    let queue = Arc::new(MemoryJobQueue::new());
    let events = Arc::new(EventBus::default());
    let templates =
        MemoryTemplateStore::new().with_template("text_to_image", serde_json::json!({}));
    let producer = Arc::new(
        Producer::new(queue.clone(), events.clone()).with_template_check(Arc::new(templates)),
    );
    let sweeper = Arc::new(RequeueSweeper::new(
        queue.clone(),
        producer.clone(),
        events,
        config.requeue.clone(),
    ));
    let state = AppState {
        producer,
        sweeper,
        config: Arc::new(config.clone()),
    };

    TestApp {
        router: build_app_router(state, &config),
        queue,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
