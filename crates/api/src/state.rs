use std::sync::Arc;

use genq_pipeline::{Producer, RequeueSweeper};

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Enqueue and query side of the job queue.
    pub producer: Arc<Producer>,
    /// Requeue sweeper shared with admin endpoints.
    pub sweeper: Arc<RequeueSweeper>,
    pub config: Arc<ServerConfig>,
}
