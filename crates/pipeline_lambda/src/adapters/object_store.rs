use pipeline_core::PipelineError;
use thiserror::Error;

/// Metadata attached to every dataset write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub sha256: String,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("object not found: {key}")]
    NotFound {
        key: String,
        version_id: Option<String>,
    },
    #[error("storage backend failure on {key}: {message}")]
    Backend { key: String, message: String },
    #[error("write to {key} refused: invocation budget of {budget_ms}ms exhausted")]
    DeadlineExceeded { key: String, budget_ms: u64 },
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { key, version_id } => {
                PipelineError::MissingDependency { key, version_id }
            }
            StoreError::Backend { key, message } => PipelineError::Storage { key, message },
            StoreError::DeadlineExceeded { budget_ms, .. } => PipelineError::Timeout { budget_ms },
        }
    }
}

/// Versioned object storage as seen by both stages.
pub trait DatasetStore {
    /// Writes `body` at `key`, superseding the previous content, and returns
    /// the new version id.
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError>;

    /// Reads `key`, pinned to `version_id` when given.
    fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Vec<u8>, StoreError>;

    /// The `sha256` metadata of the current version, if the object exists.
    fn object_fingerprint(&self, key: &str) -> Result<Option<String>, StoreError>;
}
