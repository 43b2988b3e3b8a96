//! The event store facade.

use std::sync::Arc;

use tracing::debug;

use eventline_core::{
    EventId, EventRecord, EventStoreError, EventStoreResult, ExpectedVersion, Stream,
    record::TIMESTAMP_KEY,
};
use eventline_events::{Broker, Handler, Revocation, SubscriptionContext, Within};

use crate::clock::{Clock, SystemClock};
use crate::event_store::Repository;
use crate::page::{Page, PageLink};
use crate::specification::{Specification, Start};

/// Entry point for applications: publish, read and subscribe.
///
/// `Client` owns no state of its own beyond its collaborators. Writes go to the
/// repository first; subscribers are notified only once the write succeeded, and
/// `publish` returns after every subscriber ran (or failed in isolation).
pub struct Client<R> {
    repository: R,
    broker: Broker,
    clock: Arc<dyn Clock>,
}

impl<R: Repository> Client<R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            broker: Broker::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_broker(mut self, broker: Broker) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Persist `events` into `stream` and notify subscribers.
    ///
    /// When every event already exists in the store the events are linked into `stream`
    /// instead of appended.
    pub fn publish(
        &self,
        events: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let events = self.store(events, stream, expected_version)?;
        for event in &events {
            self.broker.notify_subscribers(event)?;
        }
        Ok(())
    }

    /// Like [`publish`](Self::publish), additionally notifying the subscribers held by
    /// `context`.
    pub fn publish_in(
        &self,
        context: &SubscriptionContext,
        events: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let events = self.store(events, stream, expected_version)?;
        for event in &events {
            self.broker.notify_subscribers_in(context, event)?;
        }
        Ok(())
    }

    /// Persist without notifying anyone.
    pub fn append(
        &self,
        events: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let events = events.into_iter().map(|e| self.enrich(e)).collect();
        self.repository.append_to_stream(events, stream, expected_version)
    }

    /// Link already stored events into `stream`. Subscribers are not notified.
    pub fn link(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        self.repository.link_to_stream(event_ids, stream, expected_version)
    }

    pub fn delete_stream(&self, stream: &Stream) -> EventStoreResult<()> {
        self.repository.delete_stream(stream)
    }

    /// Start building a read; defaults to the whole global stream, oldest first.
    pub fn read(&self) -> Read<'_, R> {
        Read {
            repository: &self.repository,
            specification: Specification::new(),
        }
    }

    pub fn read_event(&self, event_id: EventId) -> EventStoreResult<EventRecord> {
        self.repository.read_event(event_id)
    }

    pub fn global_position(&self, event_id: EventId) -> EventStoreResult<u64> {
        self.repository.global_position(event_id)
    }

    pub fn position_in_stream(&self, event_id: EventId, stream: &Stream) -> EventStoreResult<Option<u64>> {
        self.repository.position_in_stream(event_id, stream)
    }

    pub fn streams_of(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>> {
        self.repository.streams_of(event_id)
    }

    pub fn page(&self, request: &PageLink) -> EventStoreResult<Page> {
        Page::load(&self.repository, request)
    }

    pub fn subscribe<I>(&self, handler: impl Into<Handler>, to: I) -> EventStoreResult<Revocation>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.broker.subscribe(handler, to)
    }

    pub fn subscribe_to_all_events(&self, handler: impl Into<Handler>) -> EventStoreResult<Revocation> {
        self.broker.subscribe_to_all_events(handler)
    }

    /// Temporary subscriptions held by `context` for the duration of a block.
    pub fn within<'a>(&self, context: &'a SubscriptionContext) -> Within<'a> {
        context.within()
    }

    fn store(
        &self,
        events: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<Vec<EventRecord>> {
        let known = !events.is_empty()
            && events
                .iter()
                .map(|e| self.repository.has_event(e.event_id()))
                .collect::<EventStoreResult<Vec<bool>>>()?
                .into_iter()
                .all(|k| k);

        if known {
            let ids: Vec<EventId> = events.iter().map(EventRecord::event_id).collect();
            self.repository.link_to_stream(&ids, stream, expected_version)?;
            debug!(stream = %stream, count = ids.len(), "linked published events");
            return ids.into_iter().map(|id| self.repository.read_event(id)).collect();
        }

        let events: Vec<EventRecord> = events.into_iter().map(|e| self.enrich(e)).collect();
        self.repository
            .append_to_stream(events.clone(), stream, expected_version)?;
        debug!(stream = %stream, count = events.len(), "appended published events");
        Ok(events)
    }

    fn enrich(&self, event: EventRecord) -> EventRecord {
        if event.metadata().contains_key(TIMESTAMP_KEY) {
            return event;
        }
        let mut metadata = event.metadata().clone();
        metadata.set_timestamp(self.clock.now());
        event.with_metadata(metadata)
    }
}

/// Read builder returned by [`Client::read`].
#[derive(Debug)]
pub struct Read<'a, R> {
    repository: &'a R,
    specification: Specification,
}

impl<R> Clone for Read<'_, R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository,
            specification: self.specification.clone(),
        }
    }
}

impl<'a, R: Repository> Read<'a, R> {
    pub fn stream(mut self, name: impl Into<String>) -> EventStoreResult<Self> {
        self.specification = self.specification.stream(name)?;
        Ok(self)
    }

    pub fn in_stream(mut self, stream: Stream) -> Self {
        self.specification = self.specification.in_stream(stream);
        self
    }

    pub fn forward(mut self) -> Self {
        self.specification = self.specification.forward();
        self
    }

    pub fn backward(mut self) -> Self {
        self.specification = self.specification.backward();
        self
    }

    pub fn from(mut self, event_id: EventId) -> Self {
        self.specification = self.specification.from(event_id);
        self
    }

    pub fn limit(mut self, count: usize) -> EventStoreResult<Self> {
        self.specification = self.specification.limit(count)?;
        Ok(self)
    }

    pub fn of_type<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.specification = self.specification.of_type(types);
        self
    }

    pub fn specification(&self) -> &Specification {
        &self.specification
    }

    pub fn to_vec(&self) -> EventStoreResult<Vec<EventRecord>> {
        self.repository.read(&self.specification)
    }

    /// Number of matching events, ignoring the limit.
    pub fn count(&self) -> EventStoreResult<usize> {
        self.repository.count(&self.specification)
    }

    /// The first event this read would return.
    pub fn first(&self) -> EventStoreResult<Option<EventRecord>> {
        let spec = self.specification.clone().limit(1)?;
        Ok(self.repository.read(&spec)?.into_iter().next())
    }

    /// The last event this read would return if it had no limit.
    pub fn last(&self) -> EventStoreResult<Option<EventRecord>> {
        if let Start::After(_) = self.specification.start() {
            // Validates the cursor and tells whether anything follows it at all.
            if self.first()?.is_none() {
                return Ok(None);
            }
        }
        let spec = self
            .specification
            .clone()
            .direction(self.specification.read_direction().reverse())
            .from_head()
            .limit(1)?;
        Ok(self.repository.read(&spec)?.into_iter().next())
    }

    /// Iterate in pages of `batch_size` events using cursor pagination.
    pub fn in_batches(&self, batch_size: usize) -> EventStoreResult<Batches<'a, R>> {
        if batch_size == 0 {
            return Err(EventStoreError::InvalidPageSize(batch_size));
        }
        Ok(Batches {
            repository: self.repository,
            specification: self.specification.clone(),
            batch_size,
            remaining: self.specification.max_count(),
            done: false,
        })
    }

    pub fn each_batch<F>(&self, batch_size: usize, mut f: F) -> EventStoreResult<()>
    where
        F: FnMut(Vec<EventRecord>) -> EventStoreResult<()>,
    {
        for batch in self.in_batches(batch_size)? {
            f(batch?)?;
        }
        Ok(())
    }
}

/// Iterator over consecutive pages of a read.
#[derive(Debug)]
pub struct Batches<'a, R> {
    repository: &'a R,
    specification: Specification,
    batch_size: usize,
    remaining: Option<usize>,
    done: bool,
}

impl<R: Repository> Batches<'_, R> {
    fn fetch(&mut self) -> EventStoreResult<Vec<EventRecord>> {
        let size = self.remaining.map_or(self.batch_size, |r| r.min(self.batch_size));
        let spec = self.specification.clone().limit(size)?;
        let batch = self.repository.read(&spec)?;

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= batch.len();
        }
        match batch.last() {
            Some(last) if batch.len() == size => {
                self.specification = self.specification.clone().from(last.event_id());
            }
            _ => self.done = true,
        }
        Ok(batch)
    }
}

impl<R: Repository> Iterator for Batches<'_, R> {
    type Item = EventStoreResult<Vec<EventRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        match self.fetch() {
            Ok(batch) if batch.is_empty() => None,
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::clock::TickingClock;
    use crate::event_store::InMemoryRepository;

    fn client() -> Client<InMemoryRepository> {
        let at = Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 0).unwrap();
        Client::new(InMemoryRepository::new()).with_clock(TickingClock::frozen(at))
    }

    fn order() -> Stream {
        Stream::new("Order-1").unwrap()
    }

    fn event(event_type: &str) -> EventRecord {
        EventRecord::new(event_type, json!({ "order_id": 1 }))
    }

    fn recorder() -> (Arc<Mutex<Vec<EventId>>>, Handler) {
        let seen: Arc<Mutex<Vec<EventId>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let handler = Handler::from_fn(move |e| {
            sink.lock().unwrap().push(e.event_id());
            Ok(())
        });
        (seen, handler)
    }

    #[test]
    fn publish_stores_then_notifies() {
        let client = client();
        let (seen, handler) = recorder();
        let _ = client.subscribe(handler, ["OrderCreated"]).unwrap();

        let created = event("OrderCreated");
        client
            .publish(vec![created.clone()], &order(), ExpectedVersion::Auto)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![created.event_id()]);
        assert_eq!(client.read().stream("Order-1").unwrap().to_vec().unwrap(), vec![created]);
    }

    #[test]
    fn failed_publish_notifies_nobody() {
        let client = client();
        let (seen, handler) = recorder();
        let _ = client.subscribe_to_all_events(handler).unwrap();

        let err = client
            .publish(vec![event("OrderCreated")], &order(), ExpectedVersion::Exact(3))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::WrongExpectedVersion(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_stamps_missing_timestamps() {
        let client = client();
        let stamped = event("OrderCreated");
        let explicit = event("OrderExpired").with_metadata(
            eventline_core::Metadata::new().with(TIMESTAMP_KEY, "2001-01-01T00:00:00Z"),
        );
        client
            .publish(vec![stamped.clone(), explicit.clone()], &order(), ExpectedVersion::Any)
            .unwrap();

        let read = client.read_event(stamped.event_id()).unwrap();
        assert_eq!(
            read.metadata().timestamp(),
            Some(Utc.with_ymd_and_hms(2019, 9, 30, 0, 0, 0).unwrap())
        );
        let read = client.read_event(explicit.event_id()).unwrap();
        assert_eq!(
            read.metadata().get(TIMESTAMP_KEY),
            Some(&json!("2001-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn publishing_known_events_links_them() {
        let client = client();
        let created = event("OrderCreated");
        client
            .publish(vec![created.clone()], &order(), ExpectedVersion::Any)
            .unwrap();

        let (seen, handler) = recorder();
        let _ = client.subscribe_to_all_events(handler).unwrap();
        let archive = Stream::new("Archive").unwrap();
        client
            .publish(vec![created.clone()], &archive, ExpectedVersion::NoStream)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![created.event_id()]);
        assert_eq!(client.read().count().unwrap(), 1);
        assert_eq!(client.streams_of(created.event_id()).unwrap().len(), 2);
    }

    #[test]
    fn publish_in_reaches_context_subscribers() {
        let client = client();
        let ctx = SubscriptionContext::new();
        let (seen, handler) = recorder();

        let inside = event("OrderCreated");
        client
            .within(&ctx)
            .subscribe(handler, ["OrderCreated"])
            .call(|| client.publish_in(&ctx, vec![inside.clone()], &order(), ExpectedVersion::Any))
            .unwrap()
            .unwrap();
        client
            .publish_in(&ctx, vec![event("OrderCreated")], &order(), ExpectedVersion::Any)
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![inside.event_id()]);
    }

    #[test]
    fn reads_first_last_and_count() {
        let client = client();
        let events: Vec<EventRecord> = (0..5).map(|_| event("OrderCreated")).collect();
        client.append(events.clone(), &order(), ExpectedVersion::Auto).unwrap();

        let read = client.read().stream("Order-1").unwrap();
        assert_eq!(read.first().unwrap(), Some(events[0].clone()));
        assert_eq!(read.last().unwrap(), Some(events[4].clone()));
        assert_eq!(read.clone().backward().first().unwrap(), Some(events[4].clone()));
        assert_eq!(read.clone().limit(2).unwrap().count().unwrap(), 5);

        let after_last = read.clone().from(events[4].event_id());
        assert_eq!(after_last.first().unwrap(), None);
        assert_eq!(after_last.last().unwrap(), None);
    }

    #[test]
    fn batches_walk_the_whole_read() {
        let client = client();
        let events: Vec<EventRecord> = (0..7).map(|_| event("OrderCreated")).collect();
        client.append(events.clone(), &order(), ExpectedVersion::Auto).unwrap();

        let sizes: Vec<usize> = client
            .read()
            .in_batches(3)
            .unwrap()
            .map(|b| b.unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut collected = Vec::new();
        client
            .read()
            .limit(5)
            .unwrap()
            .each_batch(2, |batch| {
                collected.extend(batch);
                Ok(())
            })
            .unwrap();
        assert_eq!(collected, events[..5]);

        assert!(matches!(
            client.read().in_batches(0),
            Err(EventStoreError::InvalidPageSize(0))
        ));
    }
}
