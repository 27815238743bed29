//! Workflow template storage.
//!
//! Templates are ComfyUI API-format workflow documents looked up by name.
//! The worker loop only reads them; injection always works on a copy, so
//! a store's contents never change as a side effect of processing a job.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Longest accepted template name.
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum TemplateStoreError {
    #[error("Invalid template name '{0}'")]
    InvalidName(String),

    #[error("Failed to read template '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template '{name}' is not valid JSON: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Lookup of workflow templates by name.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Load the template called `name`. `Ok(None)` when it does not exist.
    async fn load(&self, name: &str) -> Result<Option<serde_json::Value>, TemplateStoreError>;
}

/// Accept only names made of ASCII letters, digits, `_`, `-`, and `.`,
/// not starting with a dot.
pub fn is_valid_template_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Reads `<dir>/<name>.json` on every lookup.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    dir: PathBuf,
}

impl FsTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

#[async_trait]
impl TemplateStore for FsTemplateStore {
    async fn load(&self, name: &str) -> Result<Option<serde_json::Value>, TemplateStoreError> {
        if !is_valid_template_name(name) {
            return Err(TemplateStoreError::InvalidName(name.to_string()));
        }
        let path = self.dir.join(format!("{name}.json"));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TemplateStoreError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| TemplateStoreError::Parse {
                name: name.to_string(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Templates held in memory; used by tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, name: impl Into<String>, template: serde_json::Value) {
        self.templates.write().await.insert(name.into(), template);
    }

    /// Builder-style insert for synchronous setup.
    pub fn with_template(mut self, name: impl Into<String>, template: serde_json::Value) -> Self {
        self.templates.get_mut().insert(name.into(), template);
        self
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn load(&self, name: &str) -> Result<Option<serde_json::Value>, TemplateStoreError> {
        Ok(self.templates.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn name_validation() {
        assert!(is_valid_template_name("text_to_image"));
        assert!(is_valid_template_name("upscale-v2.1"));
        assert!(!is_valid_template_name(""));
        assert!(!is_valid_template_name("../secrets"));
        assert!(!is_valid_template_name("a/b"));
        assert!(!is_valid_template_name(".hidden"));
        assert!(!is_valid_template_name(&"x".repeat(200)));
    }

    #[tokio::test]
    async fn fs_store_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("upscale.json"), r#"{"1": {"inputs": {}}}"#).unwrap();
        let store = FsTemplateStore::new(dir.path());

        let template = store.load("upscale").await.unwrap().unwrap();
        assert!(template["1"]["inputs"].is_object());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let store = FsTemplateStore::new(dir.path());

        assert_matches!(
            store.load("../etc/passwd").await,
            Err(TemplateStoreError::InvalidName(_))
        );
        assert_matches!(
            store.load("broken").await,
            Err(TemplateStoreError::Parse { .. })
        );
    }

    #[tokio::test]
    async fn memory_store_returns_copies() {
        let store = MemoryTemplateStore::new().with_template("t", json!({"a": 1}));
        let mut copy = store.load("t").await.unwrap().unwrap();
        copy["a"] = json!(2);
        assert_eq!(store.load("t").await.unwrap().unwrap()["a"], 1);
    }
}
