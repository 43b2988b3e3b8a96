//! Event records and their metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{EventStoreError, EventStoreResult};
use crate::event::Event;
use crate::id::EventId;

pub const TIMESTAMP_KEY: &str = "timestamp";
pub const CORRELATION_ID_KEY: &str = "correlation_id";
pub const CAUSATION_ID_KEY: &str = "causation_id";

/// Opaque key-value metadata attached to an event record.
///
/// The store only interprets the conventional keys (`timestamp`, `correlation_id`,
/// `causation_id`); everything else is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, JsonValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Business timestamp, if present and well-formed (RFC 3339).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.get(TIMESTAMP_KEY)
            .and_then(JsonValue::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn set_timestamp(&mut self, at: DateTime<Utc>) {
        self.insert(
            TIMESTAMP_KEY,
            at.to_rfc3339_opts(SecondsFormat::Micros, true),
        );
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(CORRELATION_ID_KEY).and_then(JsonValue::as_str)
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.get(CAUSATION_ID_KEY).and_then(JsonValue::as_str)
    }

    /// Mark this metadata as caused by `cause`, inheriting its correlation id.
    pub fn correlate_with(&mut self, cause: &EventRecord) {
        let correlation = cause
            .metadata()
            .correlation_id()
            .map(str::to_string)
            .unwrap_or_else(|| cause.event_id().to_string());
        self.insert(CORRELATION_ID_KEY, correlation);
        self.insert(CAUSATION_ID_KEY, cause.event_id().to_string());
    }
}

/// An immutable event as stored by a repository.
///
/// Records are created by the caller before publication and never change afterwards.
/// Equality considers `event_id`, `event_type` and `data`; metadata is deliberately left
/// out so that a record read back from storage (possibly with enriched metadata) still
/// equals the one that was published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    event_id: EventId,
    event_type: String,
    data: JsonValue,
    #[serde(default)]
    metadata: Metadata,
}

impl EventRecord {
    /// New record with a fresh id and empty metadata.
    pub fn new(event_type: impl Into<String>, data: JsonValue) -> Self {
        Self::with_id(EventId::new(), event_type, data)
    }

    pub fn with_id(event_id: EventId, event_type: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            data,
            metadata: Metadata::default(),
        }
    }

    /// Build a record from a typed domain event.
    pub fn from_typed<E>(event: &E) -> EventStoreResult<Self>
    where
        E: Event + Serialize,
    {
        let data = serde_json::to_value(event)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
        Ok(Self::new(event.event_type(), data))
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Decode the payload back into a typed event.
    pub fn decode<E>(&self) -> EventStoreResult<E>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.data.clone())
            .map_err(|e| EventStoreError::Serialization(e.to_string()))
    }
}

impl PartialEq for EventRecord {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
            && self.event_type == other.event_type
            && self.data == other.data
    }
}

impl Eq for EventRecord {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn equality_ignores_metadata() {
        let id = EventId::new();
        let a = EventRecord::with_id(id, "OrderCreated", json!({"order": 1}));
        let b = a
            .clone()
            .with_metadata(Metadata::new().with("request_ip", "127.0.0.1"));
        assert_eq!(a, b);

        let c = EventRecord::with_id(id, "OrderCreated", json!({"order": 2}));
        assert_ne!(a, c);

        let d = EventRecord::with_id(id, "OrderExpired", json!({"order": 1}));
        assert_ne!(a, d);
    }

    #[test]
    fn timestamp_round_trips_through_metadata() {
        let at = Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 0).unwrap();
        let mut metadata = Metadata::new();
        metadata.set_timestamp(at);
        assert_eq!(metadata.timestamp(), Some(at));
    }

    #[test]
    fn correlation_is_inherited_from_cause() {
        let root = EventRecord::new("OrderPlaced", json!({}));
        let mut first = Metadata::new();
        first.correlate_with(&root);
        assert_eq!(first.correlation_id(), Some(root.event_id().to_string().as_str()));
        assert_eq!(first.causation_id(), Some(root.event_id().to_string().as_str()));

        let child = EventRecord::new("PaymentRequested", json!({})).with_metadata(first);
        let mut second = Metadata::new();
        second.correlate_with(&child);
        assert_eq!(second.correlation_id(), Some(root.event_id().to_string().as_str()));
        assert_eq!(second.causation_id(), Some(child.event_id().to_string().as_str()));
    }

    #[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq)]
    struct OrderCreated {
        order_id: u32,
    }

    impl Event for OrderCreated {
        fn event_type(&self) -> &'static str {
            "OrderCreated"
        }
    }

    #[test]
    fn typed_events_encode_and_decode() {
        let record = EventRecord::from_typed(&OrderCreated { order_id: 7 }).unwrap();
        assert_eq!(record.event_type(), "OrderCreated");
        assert_eq!(record.decode::<OrderCreated>().unwrap(), OrderCreated { order_id: 7 });
    }
}
