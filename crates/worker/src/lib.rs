//! Worker process: configuration and the background loops it runs next to
//! the worker pool.

pub mod config;
pub mod scheduler;

pub use config::WorkerConfig;
