//! Subscribers that link published events into streams named after their metadata.

use serde_json::Value as JsonValue;
use tracing::debug;

use eventline_core::record::{CAUSATION_ID_KEY, CORRELATION_ID_KEY};
use eventline_core::{EventRecord, EventStoreResult, ExpectedVersion, Stream};
use eventline_events::Subscriber;

use crate::event_store::Repository;

/// Links every event carrying metadata `key` into `<prefix><value>`.
///
/// The prefix defaults to `$by_<key>_`, so with key `city` an event with
/// `{"city": "Paris"}` lands in `$by_city_Paris`. Events without the key, or with a
/// `null` value, are left alone. Links use expected version `any`.
///
/// Meant to be registered with `subscribe_to_all_events`.
#[derive(Debug, Clone)]
pub struct LinkByMetadata<R> {
    repository: R,
    key: String,
    prefix: String,
}

impl<R: Repository> LinkByMetadata<R> {
    pub fn new(repository: R, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            prefix: format!("$by_{key}_"),
            repository,
            key,
        }
    }

    /// Link by `correlation_id` into `$by_correlation_id_<id>`.
    pub fn correlation_id(repository: R) -> Self {
        Self::new(repository, CORRELATION_ID_KEY)
    }

    /// Link by `causation_id` into `$by_causation_id_<id>`.
    pub fn causation_id(repository: R) -> Self {
        Self::new(repository, CAUSATION_ID_KEY)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Stream the event belongs to, if it carries the key.
    pub fn stream_for(&self, event: &EventRecord) -> EventStoreResult<Option<Stream>> {
        let value = match event.metadata().get(&self.key) {
            None | Some(JsonValue::Null) => return Ok(None),
            Some(JsonValue::String(value)) => value.clone(),
            Some(other) => other.to_string(),
        };
        Stream::new(format!("{}{}", self.prefix, value)).map(Some)
    }
}

impl<R: Repository> Subscriber for LinkByMetadata<R> {
    fn call(&self, event: &EventRecord) -> anyhow::Result<()> {
        let Some(stream) = self.stream_for(event)? else {
            return Ok(());
        };
        self.repository
            .link_to_stream(&[event.event_id()], &stream, ExpectedVersion::Any)?;
        debug!(event_id = %event.event_id(), stream = %stream, "linked event by metadata");
        Ok(())
    }
}
