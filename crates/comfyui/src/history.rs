//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The endpoint returns an object keyed by prompt id. The key is absent
//! while the prompt is still queued or running:
//!
//! ```text
//! { "<prompt_id>": {
//!     "outputs": { "9": { "images": [...] } },
//!     "status": {
//!       "status_str": "success" | "error",
//!       "completed": true,
//!       "messages": [ ["execution_start", {...}], ["execution_error", {...}] ]
//!     } } }
//! ```

use serde::Deserialize;

/// Status string ComfyUI reports for a failed execution.
const STATUS_ERROR: &str = "error";

/// Status message type carrying the exception details.
const MSG_EXECUTION_ERROR: &str = "execution_error";

/// Message used when a failed execution carries no status messages.
pub const GENERIC_REMOTE_ERROR: &str = "Remote execution failed without details";

/// One prompt's entry in the history response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status block of a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// `[type, data]` pairs in emission order.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

impl HistoryEntry {
    /// Whether the backend reports the prompt finished successfully.
    pub fn is_completed(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.completed) && !self.is_error()
    }

    /// Whether the backend reports an explicit error status.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            .is_some_and(|s| s == STATUS_ERROR)
    }

    /// Human-readable description of a failed execution.
    ///
    /// Prefers the `exception_message` of the first `execution_error`
    /// message, then the type of the first message, then a generic text.
    pub fn error_message(&self) -> String {
        let messages = self
            .status
            .as_ref()
            .map(|s| s.messages.as_slice())
            .unwrap_or_default();

        let exception = messages
            .iter()
            .find(|(kind, _)| kind == MSG_EXECUTION_ERROR)
            .and_then(|(_, data)| data.get("exception_message"))
            .and_then(serde_json::Value::as_str)
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        exception
            .or_else(|| messages.first().map(|(kind, _)| kind.clone()))
            .unwrap_or_else(|| GENERIC_REMOTE_ERROR.to_string())
    }
}

/// Pick the entry for `prompt_id` out of a raw history response.
///
/// Returns `Ok(None)` when the prompt has no entry yet.
pub fn parse_history(
    body: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(entry) => HistoryEntry::deserialize(entry).map(Some),
    }
}
