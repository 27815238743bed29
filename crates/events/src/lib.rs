//! genq event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PipelineEvent`]: the event envelope published by every component.
//! - [`EventLogger`]: background subscriber mirroring events into `tracing`.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, PipelineEvent};
pub use logger::EventLogger;
