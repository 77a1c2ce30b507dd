//! In-process adapters used by the local runner and the integration tests.
//!
//! `InMemoryDatasetStore` keeps every version of every object and, like a
//! bucket with an event notification configured, records a change
//! notification after each committed write whose key matches the filter.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use pipeline_core::notification::{ChangeNotification, NotificationFilter};
use pipeline_core::PipelineError;

use crate::adapters::object_store::{DatasetStore, ObjectMetadata, StoreError};
use crate::adapters::upstream::UpstreamSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub version_id: String,
    pub body: Vec<u8>,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_version: u64,
    objects: BTreeMap<String, Vec<StoredVersion>>,
    outbox: Vec<ChangeNotification>,
}

#[derive(Debug)]
pub struct InMemoryDatasetStore {
    bucket: String,
    filter: Option<NotificationFilter>,
    state: Mutex<MemoryState>,
}

impl InMemoryDatasetStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            filter: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_notifications(bucket: impl Into<String>, filter: NotificationFilter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::new(bucket)
        }
    }

    /// All versions of `key`, oldest first.
    pub fn versions(&self, key: &str) -> Vec<StoredVersion> {
        self.state
            .lock()
            .map(|state| state.objects.get(key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drains the notifications emitted since the last call.
    pub fn take_notifications(&self) -> Vec<ChangeNotification> {
        self.state
            .lock()
            .map(|mut state| std::mem::take(&mut state.outbox))
            .unwrap_or_default()
    }

    fn lock(&self, key: &str) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Backend {
            key: key.to_string(),
            message: "in-memory store lock poisoned".to_string(),
        })
    }
}

impl DatasetStore for InMemoryDatasetStore {
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        let mut state = self.lock(key)?;
        state.next_version += 1;
        let sequence = state.next_version;
        let version_id = format!("v{sequence}");

        state
            .objects
            .entry(key.to_string())
            .or_default()
            .push(StoredVersion {
                version_id: version_id.clone(),
                body: body.to_vec(),
                metadata: metadata.clone(),
            });

        if self.filter.as_ref().is_some_and(|filter| filter.matches(key)) {
            state.outbox.push(ChangeNotification {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                version_id: Some(version_id.clone()),
                event_time: Utc::now().to_rfc3339(),
                event_name: "ObjectCreated:Put".to_string(),
                sequencer: Some(format!("{sequence:016X}")),
            });
        }

        Ok(version_id)
    }

    fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Vec<u8>, StoreError> {
        let state = self.lock(key)?;
        let versions = state.objects.get(key);
        let found = match version_id {
            Some(wanted) => versions.and_then(|all| all.iter().find(|v| v.version_id == wanted)),
            None => versions.and_then(|all| all.last()),
        };

        found
            .map(|version| version.body.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
                version_id: version_id.map(str::to_string),
            })
    }

    fn object_fingerprint(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock(key)?;
        Ok(state
            .objects
            .get(key)
            .and_then(|all| all.last())
            .map(|version| version.metadata.sha256.clone()))
    }
}

/// Upstream stub serving fixed bodies per URL.
#[derive(Debug, Default)]
pub struct StaticUpstream {
    responses: BTreeMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl StaticUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.into(), body.into());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl UpstreamSource for StaticUpstream {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::Upstream {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
    }
}
