//! The rendering backend seam used by the worker loop.
//!
//! [`RenderBackend`] is what the job pipeline needs from a rendering
//! service: submit a workflow, query its status, and build public
//! locations for produced files. [`ComfyUIApi`] is the production
//! implementation; tests substitute scripted fakes.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::history::HistoryEntry;

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Queue `workflow` for execution, tagged with `client_id`.
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// Current history entry for `prompt_id`; `None` while still pending.
    async fn status(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;

    /// Base URL prefixed to artifact locations.
    fn view_base_url(&self) -> &str;
}

#[async_trait]
impl RenderBackend for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn status(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.history_entry(prompt_id).await
    }

    fn view_base_url(&self) -> &str {
        self.api_url()
    }
}
