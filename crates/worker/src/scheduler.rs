//! Periodic requeue sweep.
//!
//! Runs [`RequeueSweeper::sweep`] on a fixed interval until cancelled. The
//! first tick fires one full interval after start so a restarting worker
//! does not sweep immediately. Sweeps take the queue-wide sweep lock, so a
//! sweep still running when the next tick arrives, or one started by any
//! other process on the same queue (the admin API included), makes the tick
//! a no-op.

use std::sync::Arc;
use std::time::Duration;

use genq_pipeline::{RequeueSweeper, SweepError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub async fn run(sweeper: Arc<RequeueSweeper>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Requeue scheduler started");

    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Requeue scheduler stopping");
                break;
            }
            _ = interval.tick() => {
                match sweeper.sweep().await {
                    Ok(report) if report.evaluated > 0 => {
                        tracing::info!(
                            evaluated = report.evaluated,
                            requeued = report.requeued.len(),
                            rejected = report.rejected.len(),
                            skipped = report.skipped.len(),
                            "Requeue sweep finished",
                        );
                    }
                    Ok(_) => tracing::debug!("Requeue sweep: no failed jobs"),
                    Err(SweepError::AlreadyRunning) => {
                        tracing::debug!("Requeue sweep already in progress, skipping tick");
                    }
                    Err(e) => tracing::error!(error = %e, "Requeue sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use genq_core::job::JobRequest;
    use genq_core::memory_queue::MemoryJobQueue;
    use genq_core::queue::{JobFailure, JobQueue};
    use genq_core::requeue::RequeuePolicy;
    use genq_events::EventBus;
    use genq_pipeline::Producer;

    #[tokio::test]
    async fn sweeps_on_each_tick_until_cancelled() {
        let queue = Arc::new(MemoryJobQueue::new());
        let events = Arc::new(EventBus::default());
        let producer = Arc::new(Producer::new(queue.clone(), events.clone()));
        let sweeper = Arc::new(RequeueSweeper::new(
            queue.clone(),
            producer.clone(),
            events,
            RequeuePolicy::default(),
        ));

        let mut request = JobRequest::new("text_to_image", BTreeMap::new(), None);
        request.retry_budget = 1;
        let job = producer.enqueue(request).await.unwrap();
        queue.claim_next().await.unwrap();
        queue
            .fail(&job.id, JobFailure::new("Polling timeout: 600s", None))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(sweeper, Duration::from_millis(20), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        handle.await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting + counts.delayed, 1);
        assert!(queue.get(&job.id).await.unwrap().is_none());
    }
}
