//! Result extraction from ComfyUI history outputs.
//!
//! ComfyUI reports outputs grouped by the node that produced them:
//!
//! ```text
//! { "9": { "images": [ {"filename": "a.png", "subfolder": "", "type": "output"} ] },
//!   "12": { "text": ["..."] } }
//! ```
//!
//! [`extract`] flattens every image-like entry into an [`Artifact`]
//! tagged with its producing node. Non-image outputs are skipped.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::job::{Artifact, JobRequest, JobResult};

/// Output keys whose entries are treated as images.
const IMAGE_OUTPUT_KEYS: &[&str] = &["images", "gifs"];

/// Kind recorded when an entry carries no `type` field.
const DEFAULT_ARTIFACT_KIND: &str = "output";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Backend returned no outputs")]
    EmptyOutput,
}

/// Flatten `outputs` into a [`JobResult`].
///
/// `view_base_url` is prefixed to every artifact location, e.g.
/// `http://host:8188` produces `http://host:8188/view?filename=...`.
pub fn extract(
    outputs: Option<&Value>,
    request: &JobRequest,
    view_base_url: &str,
) -> Result<JobResult, ExtractError> {
    let groups = match outputs {
        None | Some(Value::Null) => return Err(ExtractError::EmptyOutput),
        Some(Value::Object(groups)) => groups,
        // A scalar or array cannot hold node groups; nothing to flatten.
        Some(_) => return Ok(build_result(Vec::new(), 0, request)),
    };

    let mut node_ids: Vec<&String> = groups.keys().collect();
    node_ids.sort();

    let mut artifacts = Vec::new();
    for node_id in &node_ids {
        let group = &groups[node_id.as_str()];
        for key in IMAGE_OUTPUT_KEYS {
            let Some(entries) = group.get(*key).and_then(Value::as_array) else {
                continue;
            };
            artifacts.extend(
                entries
                    .iter()
                    .filter_map(|entry| to_artifact(entry, node_id, view_base_url)),
            );
        }
    }

    Ok(build_result(artifacts, node_ids.len(), request))
}

fn to_artifact(entry: &Value, node_id: &str, view_base_url: &str) -> Option<Artifact> {
    let filename = entry.get("filename").and_then(Value::as_str)?;
    let subfolder = entry
        .get("subfolder")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = entry
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_ARTIFACT_KIND);

    Some(Artifact {
        identifier: filename.to_string(),
        location: view_url(view_base_url, filename, subfolder, kind),
        kind: kind.to_string(),
        producing_node: node_id.to_string(),
    })
}

/// Build a ComfyUI `/view` URL for a produced file.
pub fn view_url(base: &str, filename: &str, subfolder: &str, kind: &str) -> String {
    format!(
        "{}/view?filename={}&subfolder={}&type={}",
        base.trim_end_matches('/'),
        encode_query_value(filename),
        encode_query_value(subfolder),
        encode_query_value(kind),
    )
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn build_result(artifacts: Vec<Artifact>, node_count: usize, request: &JobRequest) -> JobResult {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "template_name".to_string(),
        Value::String(request.template_name.clone()),
    );
    if let Some(requester) = &request.requester_id {
        metadata.insert("requester_id".to_string(), Value::String(requester.clone()));
    }
    metadata.insert("artifact_count".to_string(), artifacts.len().into());
    metadata.insert("output_node_count".to_string(), node_count.into());
    JobResult {
        artifacts,
        metadata,
    }
}
