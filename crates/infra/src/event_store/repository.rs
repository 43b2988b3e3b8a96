use std::sync::Arc;

use eventline_core::{EventId, EventRecord, EventStoreResult, ExpectedVersion, Stream};

use crate::specification::Specification;

/// Storage backend contract for event streams.
///
/// A repository persists [`EventRecord`]s, links them into named streams and the global
/// stream, and answers [`Specification`] reads.
///
/// ## Write Semantics
///
/// `append_to_stream` and `link_to_stream` are atomic: either every record is written
/// and linked or nothing is. The version check, position assignment and duplicate
/// detection happen as one unit, so concurrent writers with checked expected versions
/// observe exactly one winner. Appends always land in the global stream as well.
///
/// ## Failure Taxonomy
///
/// - `WrongExpectedVersion`: the stream's last position does not match the expectation
/// - `EventDuplicatedInStream`: an event id would appear twice in one stream (or an
///   appended record's id already exists)
/// - `UnsupportedVersionAnyUsage`: `any` mixed with checked versions, when the backend
///   enforces it
/// - `EventNotFound`: linking or reading an unknown event, or a read cursor outside the
///   specification's scope
///
/// Backends translate their native errors into this taxonomy; anything with no
/// counterpart is reported as `Backend`.
///
/// The [`lint`](crate::event_store::lint) module holds a conformance suite every
/// implementation is expected to pass.
pub trait Repository: Send + Sync {
    fn append_to_stream(
        &self,
        records: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()>;

    fn link_to_stream(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()>;

    /// Remove every link of `stream`. The events themselves stay in the global stream.
    fn delete_stream(&self, stream: &Stream) -> EventStoreResult<()>;

    fn has_event(&self, event_id: EventId) -> EventStoreResult<bool>;

    fn last_stream_event(&self, stream: &Stream) -> EventStoreResult<Option<EventRecord>>;

    fn read(&self, specification: &Specification) -> EventStoreResult<Vec<EventRecord>>;

    /// Number of records `specification` matches, ignoring its limit.
    fn count(&self, specification: &Specification) -> EventStoreResult<usize>;

    fn read_event(&self, event_id: EventId) -> EventStoreResult<EventRecord>;

    /// Zero-based position of the event in the global stream.
    ///
    /// Positions grow strictly with persistence order. Only that order is guaranteed:
    /// backends backed by a sequence may leave gaps where an append rolled back, while
    /// [`InMemoryRepository`](crate::event_store::InMemoryRepository) keeps them dense.
    fn global_position(&self, event_id: EventId) -> EventStoreResult<u64>;

    /// Position of the event within `stream`.
    ///
    /// `None` when the event was linked without a position (expected version `any` on
    /// backends that do not assign positions in that mode). `EventNotFound` when the
    /// event is not in the stream.
    fn position_in_stream(&self, event_id: EventId, stream: &Stream) -> EventStoreResult<Option<u64>>;

    /// Named streams the event is linked into, global stream excluded.
    fn streams_of(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>>;
}

impl<R> Repository for Arc<R>
where
    R: Repository + ?Sized,
{
    fn append_to_stream(
        &self,
        records: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        (**self).append_to_stream(records, stream, expected_version)
    }

    fn link_to_stream(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        (**self).link_to_stream(event_ids, stream, expected_version)
    }

    fn delete_stream(&self, stream: &Stream) -> EventStoreResult<()> {
        (**self).delete_stream(stream)
    }

    fn has_event(&self, event_id: EventId) -> EventStoreResult<bool> {
        (**self).has_event(event_id)
    }

    fn last_stream_event(&self, stream: &Stream) -> EventStoreResult<Option<EventRecord>> {
        (**self).last_stream_event(stream)
    }

    fn read(&self, specification: &Specification) -> EventStoreResult<Vec<EventRecord>> {
        (**self).read(specification)
    }

    fn count(&self, specification: &Specification) -> EventStoreResult<usize> {
        (**self).count(specification)
    }

    fn read_event(&self, event_id: EventId) -> EventStoreResult<EventRecord> {
        (**self).read_event(event_id)
    }

    fn global_position(&self, event_id: EventId) -> EventStoreResult<u64> {
        (**self).global_position(event_id)
    }

    fn position_in_stream(&self, event_id: EventId, stream: &Stream) -> EventStoreResult<Option<u64>> {
        (**self).position_in_stream(event_id, stream)
    }

    fn streams_of(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>> {
        (**self).streams_of(event_id)
    }
}
