//! Event type constants published on the pipeline event bus.
//!
//! Used by the worker loop, the producer, and the requeue sweep when
//! publishing `PipelineEvent`s, and by subscribers matching on them.

/// Progress update during job execution (`{"percent": n}`).
pub const EVENT_JOB_PROGRESS: &str = "job.progress";

/// Worker-side submission state changed (`{"state": "polling"}`).
pub const EVENT_JOB_STATE_CHANGED: &str = "job.state_changed";

/// Job completed successfully.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// A processing attempt failed.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// The injector degraded to the generic path or skipped a parameter.
pub const EVENT_JOB_INJECTION_WARNING: &str = "job.injection_warning";

/// A job was added to the queue by the producer.
pub const EVENT_JOB_ENQUEUED: &str = "job.enqueued";

/// A failed job was resubmitted.
pub const EVENT_REQUEUE_ACCEPTED: &str = "requeue.accepted";

/// A failed job was left in the failed set.
pub const EVENT_REQUEUE_REJECTED: &str = "requeue.rejected";

/// A failed job could not be evaluated.
pub const EVENT_REQUEUE_SKIPPED: &str = "requeue.skipped";

pub const EVENT_REQUEUE_SWEEP_COMPLETED: &str = "requeue.sweep_completed";

pub const EVENT_QUEUE_PAUSED: &str = "queue.paused";

pub const EVENT_QUEUE_RESUMED: &str = "queue.resumed";

/// Old finished entries were removed.
pub const EVENT_QUEUE_CLEANED: &str = "queue.cleaned";
