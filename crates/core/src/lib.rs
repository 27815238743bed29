//! Domain logic for the genq job engine.
//!
//! Everything in this crate is free of network and database I/O:
//!
//! - [`job`]: request, attempt, and result data model.
//! - [`injection`]: parameter injection into backend workflow templates.
//! - [`extraction`]: flattening backend outputs into artifacts.
//! - [`progress`]: progress milestones of the worker loop.
//! - [`queue`]: the [`JobQueue`](queue::JobQueue) seam to the durable queue,
//!   with an in-memory implementation in [`memory_queue`].
//! - [`requeue`]: the requeue classification policy and failed-set stats.

pub mod error;
pub mod extraction;
pub mod injection;
pub mod job;
pub mod job_events;
pub mod memory_queue;
pub mod progress;
pub mod queue;
pub mod requeue;
pub mod types;
