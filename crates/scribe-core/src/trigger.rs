use crate::error::{Result, ScribeError};
use crate::types::IngestionEvent;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Event-type marker for object creation notifications
/// (`ObjectCreated:Put`, `s3:ObjectCreated:*`, ...).
const OBJECT_CREATED: &str = "ObjectCreated";

/// Flat notification record: `{bucketName, objectKey, eventType}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatRecord {
    bucket_name: String,
    object_key: String,
    #[serde(default)]
    event_type: Option<String>,
}

/// One record of an S3-style `{"Records": [...]}` envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3Record {
    #[serde(default)]
    event_name: Option<String>,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Translates raw storage notifications into `IngestionEvent`s.
///
/// Payloads may be a single flat record, an array of flat records, or an
/// S3-style envelope. Records that are not object creations, or whose key
/// does not end with the suffix filter, are dropped without error. A record
/// that cannot be parsed yields a `MalformedTrigger` entry without
/// affecting its siblings.
#[derive(Debug, Clone)]
pub struct TriggerAdapter {
    suffix_filter: String,
}

impl TriggerAdapter {
    pub fn new(suffix_filter: impl Into<String>) -> Self {
        Self {
            suffix_filter: suffix_filter.into(),
        }
    }

    pub fn suffix_filter(&self) -> &str {
        &self.suffix_filter
    }

    /// Whether a key passes the suffix filter. An empty filter admits all.
    pub fn admits(&self, key: &str) -> bool {
        key.ends_with(&self.suffix_filter)
    }

    pub fn translate(&self, payload: &[u8]) -> Vec<Result<IngestionEvent>> {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(ScribeError::MalformedTrigger(format!(
                    "invalid JSON: {}",
                    e
                )))]
            }
        };

        let records: Vec<Option<Result<IngestionEvent>>> = match value {
            Value::Object(mut map) if map.contains_key("Records") => {
                match map.remove("Records") {
                    Some(Value::Array(records)) => records
                        .into_iter()
                        .map(|r| self.translate_s3_record(r))
                        .collect(),
                    _ => vec![Some(Err(ScribeError::MalformedTrigger(
                        "`Records` must be an array".to_string(),
                    )))],
                }
            }
            Value::Array(records) => records
                .into_iter()
                .map(|r| self.translate_flat_record(r))
                .collect(),
            other @ Value::Object(_) => vec![self.translate_flat_record(other)],
            _ => vec![Some(Err(ScribeError::MalformedTrigger(
                "payload must be an object or an array".to_string(),
            )))],
        };

        records.into_iter().flatten().collect()
    }

    fn translate_flat_record(&self, record: Value) -> Option<Result<IngestionEvent>> {
        match serde_json::from_value::<FlatRecord>(record) {
            Ok(r) => self.admit(r.bucket_name, r.object_key, r.event_type.as_deref()),
            Err(e) => Some(Err(ScribeError::MalformedTrigger(format!(
                "invalid record: {}",
                e
            )))),
        }
    }

    fn translate_s3_record(&self, record: Value) -> Option<Result<IngestionEvent>> {
        match serde_json::from_value::<S3Record>(record) {
            Ok(r) => self.admit(r.s3.bucket.name, r.s3.object.key, r.event_name.as_deref()),
            Err(e) => Some(Err(ScribeError::MalformedTrigger(format!(
                "invalid S3 record: {}",
                e
            )))),
        }
    }

    /// `None` means the record was filtered out.
    fn admit(
        &self,
        bucket: String,
        raw_key: String,
        event_type: Option<&str>,
    ) -> Option<Result<IngestionEvent>> {
        if let Some(event_type) = event_type {
            if !event_type.contains(OBJECT_CREATED) {
                log::debug!("Dropping {} event for {}/{}", event_type, bucket, raw_key);
                return None;
            }
        }

        let key = match decode_object_key(&raw_key) {
            Ok(key) => key,
            Err(e) => return Some(Err(e)),
        };

        if bucket.is_empty() || key.is_empty() {
            return Some(Err(ScribeError::MalformedTrigger(
                "bucket and key must be non-empty".to_string(),
            )));
        }

        if !self.admits(&key) {
            log::debug!(
                "Dropping {}/{}: does not match suffix {:?}",
                bucket,
                key,
                self.suffix_filter
            );
            return None;
        }

        Some(Ok(IngestionEvent {
            bucket,
            key,
            received_at: Utc::now(),
        }))
    }
}

impl Default for TriggerAdapter {
    fn default() -> Self {
        Self::new(".txt")
    }
}

/// Object keys arrive form-encoded: `+` is a space, `%XX` an escaped byte.
fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .map_err(|e| ScribeError::MalformedTrigger(format!("undecodable key {:?}: {}", raw, e)))
}

/// Acknowledgement handle for one delivered notification.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the notification consumed.
    async fn ack(&self) -> Result<()>;

    /// Leave the notification unconsumed so the transport re-delivers it,
    /// optionally after `delay`.
    async fn nack(&self, delay: Option<Duration>) -> Result<()>;
}

/// A raw notification as handed over by a trigger transport.
pub struct Delivery {
    pub payload: Vec<u8>,
    /// How many times the transport has delivered this payload (1 = first).
    pub delivery_count: u64,
    pub acker: Box<dyn Acknowledger>,
}

/// A pluggable trigger transport.
/// Implementations subscribe to a notification source and emit a stream of
/// deliveries; the coordinator's verdict is reported back via `acker`.
#[async_trait]
pub trait TriggerSource: Send + Sync + 'static {
    /// Source name (used in tracing and metrics labels).
    fn name(&self) -> &str;

    /// Start producing deliveries. The stream runs until cancelled or the
    /// source disconnects.
    async fn subscribe(&self) -> Result<BoxStream<'static, Delivery>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_keys(results: Vec<Result<IngestionEvent>>) -> Vec<String> {
        results
            .into_iter()
            .map(|r| r.expect("expected admitted event").key)
            .collect()
    }

    #[test]
    fn test_suffix_filter_admits_txt_and_drops_json() {
        let adapter = TriggerAdapter::default();
        let payload = br#"[
            {"bucketName": "b1", "objectKey": "reports/q1.txt", "eventType": "ObjectCreated:Put"},
            {"bucketName": "b1", "objectKey": "reports/q1.json", "eventType": "ObjectCreated:Put"}
        ]"#;

        let events = adapter.translate(payload);
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.bucket, "b1");
        assert_eq!(event.key, "reports/q1.txt");
    }

    #[test]
    fn test_non_creation_events_are_dropped() {
        let adapter = TriggerAdapter::default();
        let payload =
            br#"{"bucketName": "b1", "objectKey": "a.txt", "eventType": "ObjectRemoved:Delete"}"#;
        assert!(adapter.translate(payload).is_empty());
    }

    #[test]
    fn test_missing_event_type_counts_as_creation() {
        let adapter = TriggerAdapter::default();
        let payload = br#"{"bucketName": "b1", "objectKey": "a.txt"}"#;
        assert_eq!(ok_keys(adapter.translate(payload)), vec!["a.txt"]);
    }

    #[test]
    fn test_s3_envelope_with_encoded_key() {
        let adapter = TriggerAdapter::default();
        let payload = br#"{"Records": [{
            "eventName": "ObjectCreated:Put",
            "s3": {"bucket": {"name": "docs"}, "object": {"key": "annual+report%202024.txt"}}
        }]}"#;

        let events = adapter.translate(payload);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.bucket, "docs");
        assert_eq!(event.key, "annual report 2024.txt");
    }

    #[test]
    fn test_malformed_record_does_not_poison_batch() {
        let adapter = TriggerAdapter::default();
        let payload = br#"[
            {"bucketName": "b1"},
            {"bucketName": "b1", "objectKey": "ok.txt"}
        ]"#;

        let results = adapter.translate(payload);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ScribeError::MalformedTrigger(_))));
        assert_eq!(results[1].as_ref().unwrap().key, "ok.txt");
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let adapter = TriggerAdapter::default();
        let results = adapter.translate(b"not json");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ScribeError::MalformedTrigger(_))));
    }

    #[test]
    fn test_empty_suffix_admits_everything() {
        let adapter = TriggerAdapter::new("");
        let payload = br#"{"bucketName": "b1", "objectKey": "image.png"}"#;
        assert_eq!(ok_keys(adapter.translate(payload)), vec!["image.png"]);
    }
}
