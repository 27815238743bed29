//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, typed history parsing, and the
//! [`RenderBackend`] trait the job pipeline drives.

pub mod api;
pub mod backend;
pub mod history;

pub use api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
pub use backend::RenderBackend;
pub use history::HistoryEntry;
