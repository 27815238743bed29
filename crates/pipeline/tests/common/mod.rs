//! Shared fixtures for pipeline integration tests: a scripted rendering
//! backend, a text-to-image template, and a wired-up processor.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genq_comfyui::history::{HistoryEntry, HistoryStatus};
use genq_comfyui::{ComfyUIApiError, RenderBackend, SubmitResponse};
use genq_core::job::JobRequest;
use genq_core::memory_queue::MemoryJobQueue;
use genq_core::queue::{EnqueueOptions, JobQueue, QueuedJob};
use genq_events::EventBus;
use genq_pipeline::{JobProcessor, MemoryTemplateStore, PollConfig};
use serde_json::{json, Value};

pub const VIEW_BASE: &str = "http://comfy.test:8188";

/// One scripted answer to a status query.
#[derive(Clone)]
pub enum Step {
    /// No history entry yet.
    Pending,
    /// Entry present but not completed.
    Running,
    Completed(Value),
    Error(&'static str),
    /// The status query itself fails.
    QueryFails(u16),
}

impl Step {
    fn answer(self) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        match self {
            Step::Pending => Ok(None),
            Step::Running => Ok(Some(HistoryEntry {
                outputs: None,
                status: Some(HistoryStatus {
                    status_str: None,
                    completed: false,
                    messages: Vec::new(),
                }),
            })),
            Step::Completed(outputs) => Ok(Some(HistoryEntry {
                outputs: Some(outputs),
                status: Some(HistoryStatus {
                    status_str: Some("success".into()),
                    completed: true,
                    messages: Vec::new(),
                }),
            })),
            Step::Error(message) => Ok(Some(HistoryEntry {
                outputs: None,
                status: Some(HistoryStatus {
                    status_str: Some("error".into()),
                    completed: false,
                    messages: vec![(
                        "execution_error".into(),
                        json!({ "exception_message": message }),
                    )],
                }),
            })),
            Step::QueryFails(status) => Err(ComfyUIApiError::ApiError {
                status,
                body: "unavailable".into(),
            }),
        }
    }
}

/// How the backend answers a submission.
#[derive(Clone)]
pub enum SubmitBehavior {
    Accept,
    Reject(u16),
    NoPromptId,
}

/// Backend that follows a script of status answers. Once the script is
/// exhausted every query returns `fallback`.
pub struct ScriptedBackend {
    submit: SubmitBehavior,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    submitted: Mutex<Vec<(Value, String)>>,
    status_calls: Mutex<u32>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Step>, fallback: Step) -> Self {
        Self {
            submit: SubmitBehavior::Accept,
            script: Mutex::new(script.into()),
            fallback,
            submitted: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
        }
    }

    /// Running for `running` queries, then completed with one image.
    pub fn completes_after(running: usize) -> Self {
        let mut script = vec![Step::Running; running];
        script.push(Step::Completed(sample_outputs()));
        Self::new(script, Step::Running)
    }

    pub fn with_submit(mut self, submit: SubmitBehavior) -> Self {
        self.submit = submit;
        self
    }

    pub fn submitted(&self) -> Vec<(Value, String)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> u32 {
        *self.status_calls.lock().unwrap()
    }
}

#[async_trait]
impl RenderBackend for ScriptedBackend {
    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submitted
            .lock()
            .unwrap()
            .push((workflow.clone(), client_id.to_string()));
        match self.submit {
            SubmitBehavior::Accept => Ok(SubmitResponse {
                prompt_id: Some("prompt-1".into()),
                number: Some(0),
            }),
            SubmitBehavior::Reject(status) => Err(ComfyUIApiError::ApiError {
                status,
                body: "rejected".into(),
            }),
            SubmitBehavior::NoPromptId => Ok(SubmitResponse::default()),
        }
    }

    async fn status(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        assert_eq!(prompt_id, "prompt-1");
        *self.status_calls.lock().unwrap() += 1;
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        step.answer()
    }

    fn view_base_url(&self) -> &str {
        VIEW_BASE
    }
}

pub fn sample_outputs() -> Value {
    json!({
        "9": {"images": [{"filename": "genq_00001_.png", "subfolder": "", "type": "output"}]},
        "12": {"text": ["unused"]}
    })
}

pub fn text_to_image_template() -> Value {
    json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 20, "cfg": 7.0, "sampler_name": "euler", "scheduler": "normal", "denoise": 1.0}},
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "base.safetensors"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512, "batch_size": 1}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "8": {"class_type": "VAEDecode", "inputs": {"samples": ["3", 0], "vae": ["4", 2]}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "genq", "images": ["8", 0]}}
    })
}

pub fn request(template: &str) -> JobRequest {
    JobRequest::new(
        template,
        BTreeMap::from([
            ("prompt".to_string(), json!("a lighthouse at dusk")),
            ("seed".to_string(), json!(42)),
        ]),
        Some("tester".into()),
    )
}

pub fn fast_poll(max_attempts: u32) -> PollConfig {
    PollConfig {
        interval: Duration::ZERO,
        max_attempts,
    }
}

pub struct Harness {
    pub queue: Arc<MemoryJobQueue>,
    pub backend: Arc<ScriptedBackend>,
    pub templates: Arc<MemoryTemplateStore>,
    pub events: Arc<EventBus>,
    pub processor: Arc<JobProcessor>,
}

impl Harness {
    pub fn new(backend: ScriptedBackend, poll: PollConfig) -> Self {
        let queue = Arc::new(MemoryJobQueue::new());
        let backend = Arc::new(backend);
        let templates = Arc::new(
            MemoryTemplateStore::new().with_template("text_to_image", text_to_image_template()),
        );
        let events = Arc::new(EventBus::default());
        let processor = Arc::new(JobProcessor::new(
            queue.clone(),
            backend.clone(),
            templates.clone(),
            events.clone(),
            poll,
        ));
        Self {
            queue,
            backend,
            templates,
            events,
            processor,
        }
    }

    /// Enqueue `request` with a single attempt and claim it.
    pub async fn claim(&self, request: &JobRequest) -> QueuedJob {
        self.queue
            .enqueue(
                request.to_payload(),
                EnqueueOptions {
                    attempts: 1,
                    ..EnqueueOptions::new("job-1")
                },
            )
            .await
            .unwrap();
        self.queue.claim_next().await.unwrap().unwrap()
    }
}
