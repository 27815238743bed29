//! Completion poller: drives one submitted prompt to a terminal state.
//!
//! ```text
//! Submitted ──► Polling ──► Completed
//!                  │   └──► Failed     (backend reported an error)
//!                  └──────► TimedOut   (attempt budget exhausted)
//! ```
//!
//! Each attempt queries the backend first and sleeps afterwards, so the
//! first query happens right after submission. A failing status query is
//! logged and counted as an attempt; it only becomes the job's error when
//! it was the last attempt.

use std::time::Duration;

use genq_comfyui::{ComfyUIApiError, RenderBackend};
use genq_core::progress::poll_progress;
use tokio::time::Instant;

use crate::error::JobError;
use crate::progress::ProgressReporter;

/// Default delay between status queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of status queries before giving up.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 120;

/// Polling bounds. Total wait is roughly `interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed | PollState::Failed | PollState::TimedOut
        )
    }
}

pub struct CompletionPoller<'a> {
    backend: &'a dyn RenderBackend,
    config: PollConfig,
    state: PollState,
    attempts: u32,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(backend: &'a dyn RenderBackend, config: PollConfig) -> Self {
        Self {
            backend,
            config,
            state: PollState::Submitted,
            attempts: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Status queries issued so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Poll `prompt_id` until it completes, fails, or the attempt budget
    /// runs out. Returns the backend's raw outputs on completion.
    pub async fn run(
        &mut self,
        prompt_id: &str,
        reporter: &mut ProgressReporter,
    ) -> Result<Option<serde_json::Value>, JobError> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts;
        let mut last_error: Option<ComfyUIApiError> = None;
        self.state = PollState::Polling;

        while self.attempts < max_attempts {
            self.attempts += 1;
            let attempt = self.attempts;

            match self.backend.status(prompt_id).await {
                Ok(Some(entry)) if entry.is_completed() => {
                    self.state = PollState::Completed;
                    tracing::debug!(job_id = %reporter.job_id(), prompt_id, attempt, "Backend reported completion");
                    return Ok(entry.outputs);
                }
                Ok(Some(entry)) if entry.is_error() => {
                    self.state = PollState::Failed;
                    return Err(JobError::RemoteExecution {
                        message: entry.error_message(),
                    });
                }
                Ok(_) => {
                    last_error = None;
                    reporter.report(poll_progress(attempt, max_attempts)).await;
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %reporter.job_id(),
                        prompt_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Status query failed",
                    );
                    last_error = Some(e);
                }
            }

            if self.attempts < max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        self.state = PollState::TimedOut;
        match last_error {
            Some(e) => Err(JobError::StatusQuery {
                status: e.status_code(),
                message: e.to_string(),
            }),
            None => Err(JobError::PollTimeout {
                elapsed: started.elapsed(),
            }),
        }
    }
}
