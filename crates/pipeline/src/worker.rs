//! Fixed pool of worker slots.
//!
//! Each slot is an independent task that claims one job at a time from
//! the durable queue and processes it to completion. Slots share nothing
//! but the collaborators inside [`JobProcessor`]. Cancellation is checked
//! between jobs only; a job in flight runs until it completes, fails, or
//! its poll budget times out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::processor::JobProcessor;

/// Default number of concurrent worker slots.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default sleep when the queue has nothing to claim.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    processor: Arc<JobProcessor>,
    concurrency: usize,
    idle_interval: Duration,
}

impl WorkerPool {
    pub fn new(processor: Arc<JobProcessor>, concurrency: usize) -> Self {
        Self {
            processor,
            concurrency: concurrency.max(1),
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Run all slots until `cancel` fires and every slot has finished its
    /// current job.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            concurrency = self.concurrency,
            idle_interval_ms = self.idle_interval.as_millis() as u64,
            "Worker pool started",
        );

        let mut slots = JoinSet::new();
        for slot in 0..self.concurrency {
            slots.spawn(run_slot(
                slot,
                self.processor.clone(),
                self.idle_interval,
                cancel.clone(),
            ));
        }

        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker slot terminated abnormally");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_slot(
    slot: usize,
    processor: Arc<JobProcessor>,
    idle_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(slot, "Worker slot started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let claimed = match processor.queue().claim_next().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(slot, error = %e, "Failed to claim job");
                None
            }
        };

        match claimed {
            Some(job) => processor.handle(job).await,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle_interval) => {}
                }
            }
        }
    }
    tracing::debug!(slot, "Worker slot stopped");
}
