//! Event-to-log bridge.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! mirrors every [`PipelineEvent`] into `tracing`, so deployments without
//! other subscribers still get a structured record of the pipeline. It
//! runs as a long-lived background task and stops when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::PipelineEvent;

/// Background subscriber that logs pipeline events.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel is closed.
    pub async fn run(mut receiver: broadcast::Receiver<PipelineEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => Self::log(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
    }

    fn log(event: &PipelineEvent) {
        let job_id = event.job_id.as_deref().unwrap_or("-");
        if event.event_type.ends_with(".failed") || event.event_type.ends_with(".skipped") {
            tracing::warn!(
                event_type = %event.event_type,
                job_id,
                payload = %event.payload,
                "Pipeline event"
            );
        } else {
            tracing::debug!(
                event_type = %event.event_type,
                job_id,
                payload = %event.payload,
                "Pipeline event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn stops_when_bus_is_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EventLogger::run(bus.subscribe()));
        bus.publish(PipelineEvent::new("job.completed").for_job("j"));
        drop(bus);
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("logger should stop")
            .unwrap();
    }
}
