//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission and history retrieval using [`reqwest`].
//! Progress is tracked by polling history rather than over WebSocket.

use serde::Deserialize;

use crate::history::{parse_history, HistoryEntry};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// queuing a workflow.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt. A 2xx response
    /// without it is a protocol violation the caller must reject.
    #[serde(default)]
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body does not have the expected shape.
    #[error("Invalid ComfyUI response: {0}")]
    InvalidResponse(String),
}

impl ComfyUIApiError {
    /// HTTP status of the failed response, if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ComfyUIApiError::ApiError { status, .. } => Some(*status),
            ComfyUIApiError::Request(e) => e.status().map(|s| s.as_u16()),
            ComfyUIApiError::InvalidResponse(_) => None,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling and per-request timeouts).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve the raw execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve and parse the history entry for `prompt_id`.
    ///
    /// `Ok(None)` means the prompt has not produced a history entry yet.
    pub async fn history_entry(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let body = self.get_history(prompt_id).await?;
        parse_history(&body, prompt_id).map_err(|e| ComfyUIApiError::InvalidResponse(e.to_string()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ComfyUIApiError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_response_without_prompt_id_parses() {
        let resp: SubmitResponse =
            serde_json::from_str(r#"{"number": 4, "node_errors": {}}"#).unwrap();
        assert!(resp.prompt_id.is_none());
        assert_eq!(resp.number, Some(4));
    }

    #[test]
    fn submit_response_with_prompt_id_parses() {
        let resp: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id": "p-1", "number": 0}"#).unwrap();
        assert_eq!(resp.prompt_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://comfy:8188/".to_string());
        assert_eq!(api.api_url(), "http://comfy:8188");
    }

    #[test]
    fn api_error_exposes_status() {
        let err = ComfyUIApiError::ApiError {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "ComfyUI API error (503): busy");
        assert_eq!(
            ComfyUIApiError::InvalidResponse("x".into()).status_code(),
            None
        );
    }
}
