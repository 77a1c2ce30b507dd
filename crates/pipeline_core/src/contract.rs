use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::report::ReportBody;

pub const REPORT_RECORD_SCHEMA_VERSION: &str = "v1";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Updated,
    Unchanged,
}

/// A completed storage write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetWrite {
    pub key: String,
    pub version_id: String,
    pub sha256: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSync {
    pub key: String,
    pub status: SyncStatus,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub bucket: String,
    pub population: DatasetWrite,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_relative: Option<SeriesSync>,
}

/// The stored report for one processed notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub record_schema: String,
    pub series_id: String,
    pub period: String,
    pub population_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population_version: Option<String>,
    pub price_relative_key: String,
    pub notification_event_time: String,
    #[serde(flatten)]
    pub body: ReportBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWrite {
    pub source_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    pub result_key: String,
    pub result_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub status: String,
    pub reports: Vec<ReportWrite>,
}

impl ReportResponse {
    pub fn ignored(status: &str) -> Self {
        Self {
            status: status.to_string(),
            reports: Vec::new(),
        }
    }
}

/// Re-serializes a JSON payload compactly with sorted object keys so equal
/// documents hash equally.
pub fn normalize_json_payload(raw: &[u8], what: &str) -> Result<Vec<u8>, PipelineError> {
    let document: Value = serde_json::from_slice(raw)
        .map_err(|error| PipelineError::malformed(what, error.to_string()))?;
    serde_json::to_vec(&canonicalize(document))
        .map_err(|error| PipelineError::Internal(error.to_string()))
}

// Rebuilt explicitly so the order holds even when `preserve_order` is enabled.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn stable_contract_json(value: impl Serialize) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec(&value).map_err(|error| PipelineError::Internal(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_insensitive_to_key_order_and_whitespace() {
        let first = normalize_json_payload(br#"{ "b": 1, "a": [1, 2] }"#, "population")
            .expect("payload should normalize");
        let second = normalize_json_payload(br#"{"a":[1,2],"b":1}"#, "population")
            .expect("payload should normalize");

        assert_eq!(first, br#"{"a":[1,2],"b":1}"#.to_vec());
        assert_eq!(content_fingerprint(&first), content_fingerprint(&second));
    }

    #[test]
    fn normalization_rejects_invalid_json() {
        let error = normalize_json_payload(b"{", "population").expect_err("invalid json");
        assert!(!error.is_retryable());
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        assert_eq!(
            content_fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sync_status_serializes_snake_case() {
        let json = serde_json::to_string(&SyncStatus::Unchanged).expect("status should serialize");
        assert_eq!(json, "\"unchanged\"");
    }
}
