//! Storage change notifications as delivered through the queue.
//!
//! Message bodies use the S3 event notification format. Object keys arrive
//! URL-encoded (`+` for spaces) and are decoded here so the rest of the
//! pipeline only ever sees raw keys.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PipelineError;

pub const TEST_EVENT: &str = "s3:TestEvent";
pub const DEFAULT_NOTIFICATION_PREFIX: &str = "bls/api/";
pub const DEFAULT_NOTIFICATION_SUFFIX: &str = "population.json";

/// Key filter the store applies before emitting a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub prefix: String,
    pub suffix: String,
}

impl NotificationFilter {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix) && key.ends_with(&self.suffix)
    }
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_PREFIX, DEFAULT_NOTIFICATION_SUFFIX)
    }
}

/// A single object-created event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
    pub event_time: String,
    pub event_name: String,
    pub sequencer: Option<String>,
}

impl ChangeNotification {
    pub fn is_object_created(&self) -> bool {
        self.event_name.starts_with("ObjectCreated")
    }

    /// Renders the notification the way the store delivers it to the queue.
    pub fn to_event_body(&self) -> String {
        json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventTime": self.event_time,
                "eventName": self.event_name,
                "s3": {
                    "bucket": { "name": self.bucket },
                    "object": {
                        "key": encode_key(&self.key),
                        "versionId": self.version_id,
                        "sequencer": self.sequencer,
                    }
                }
            }]
        })
        .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationBody {
    Changes(Vec<ChangeNotification>),
    /// Sent once by S3 when the notification configuration is created.
    TestEvent,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "Records", default)]
    records: Option<Vec<EventRecord>>,
    #[serde(rename = "Event", default)]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRecord {
    #[serde(default)]
    event_source: Option<String>,
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    event_time: Option<String>,
    s3: EventEntity,
}

#[derive(Debug, Deserialize)]
struct EventEntity {
    bucket: EventBucket,
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventObject {
    key: String,
    #[serde(default)]
    version_id: Option<String>,
    #[serde(default)]
    sequencer: Option<String>,
}

pub fn parse_notification_body(body: &str) -> Result<NotificationBody, PipelineError> {
    let envelope: EventEnvelope = serde_json::from_str(body)
        .map_err(|error| PipelineError::malformed("notification", error.to_string()))?;

    if envelope.event.as_deref() == Some(TEST_EVENT) {
        return Ok(NotificationBody::TestEvent);
    }

    let records = envelope.records.unwrap_or_default();
    if records.is_empty() {
        return Err(PipelineError::malformed(
            "notification",
            "message carries no Records",
        ));
    }

    let mut notifications = Vec::with_capacity(records.len());
    for record in records {
        if let Some(source) = record.event_source.as_deref() {
            if source != "aws:s3" {
                return Err(PipelineError::malformed(
                    "notification",
                    format!("unexpected event source '{source}'"),
                ));
            }
        }
        notifications.push(ChangeNotification {
            bucket: record.s3.bucket.name,
            key: decode_key(&record.s3.object.key)?,
            version_id: record.s3.object.version_id.filter(|v| !v.is_empty()),
            event_time: record.event_time.unwrap_or_default(),
            event_name: record.event_name.unwrap_or_default(),
            sequencer: record.s3.object.sequencer,
        });
    }

    Ok(NotificationBody::Changes(notifications))
}

fn decode_key(raw: &str) -> Result<String, PipelineError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|error| PipelineError::malformed("notification key", error.to_string()))
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).replace("%20", "+"))
        .collect::<Vec<_>>()
        .join("/")
}
