//! Job lifecycle engine.
//!
//! - [`processor`]: the worker loop body (load, inject, submit, poll, extract).
//! - [`poller`]: the bounded completion poller.
//! - [`worker`]: the fixed pool of worker slots.
//! - [`producer`]: enqueueing, status lookup, and queue administration.
//! - [`requeue`]: the failed-set sweep built on `genq_core::requeue`.
//! - [`templates`]: workflow template stores.
//! - [`config`]: environment parsing shared by the binaries.

pub mod config;
pub mod error;
pub mod poller;
pub mod processor;
pub mod producer;
pub mod progress;
pub mod requeue;
pub mod templates;
pub mod worker;

pub use config::ConfigError;
pub use error::JobError;
pub use poller::PollConfig;
pub use processor::JobProcessor;
pub use producer::{JobStatusView, Producer, ProducerError};
pub use requeue::{RequeueSweeper, SweepError, SweepReport};
pub use templates::{FsTemplateStore, MemoryTemplateStore, TemplateStore, TemplateStoreError};
pub use worker::WorkerPool;
