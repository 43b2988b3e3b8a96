use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use eventline_core::{
    EventId, EventRecord, EventStoreError, EventStoreResult, ExpectedVersion, Stream,
};

use super::repository::Repository;
use crate::specification::{Specification, Start};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum VersionMode {
    Any,
    Checked,
}

impl From<ExpectedVersion> for VersionMode {
    fn from(value: ExpectedVersion) -> Self {
        if value.is_any() { Self::Any } else { Self::Checked }
    }
}

#[derive(Debug)]
struct StoredRecord {
    record: EventRecord,
    global_position: u64,
}

#[derive(Debug, Default)]
struct Storage {
    records: HashMap<EventId, StoredRecord>,
    global: Vec<EventId>,
    /// Named stream → event ids; the index is the position.
    streams: BTreeMap<String, Vec<EventId>>,
    /// Last expected-version mode used per named stream.
    modes: HashMap<String, VersionMode>,
}

impl Storage {
    fn stream_ids(&self, stream: &Stream) -> &[EventId] {
        match stream {
            Stream::Global => &self.global,
            Stream::Named(name) => self.streams.get(name).map(Vec::as_slice).unwrap_or_default(),
        }
    }

    fn last_position(&self, stream: &Stream) -> Option<u64> {
        (self.stream_ids(stream).len() as u64).checked_sub(1)
    }

    fn record(&self, event_id: EventId) -> EventStoreResult<&StoredRecord> {
        self.records
            .get(&event_id)
            .ok_or(EventStoreError::EventNotFound(event_id))
    }

    /// Validate a write of `event_ids` into `stream`. Nothing is mutated.
    fn check_write(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
        appending: bool,
        strict: bool,
    ) -> EventStoreResult<()> {
        let resolved = expected_version.resolve_for(stream, |s| Ok(self.last_position(s)))?;

        if strict {
            if let Some(previous) = self.modes.get(stream.name()) {
                if *previous != VersionMode::from(expected_version) {
                    return Err(EventStoreError::UnsupportedVersionAnyUsage(
                        stream.name().to_string(),
                    ));
                }
            }
        }

        let current = self.last_position(stream);
        if !expected_version.is_any() && current != resolved {
            return Err(EventStoreError::wrong_expected_version(format!(
                "expected {expected_version} for stream '{stream}', last position is {}",
                current.map_or_else(|| "none".to_string(), |p| p.to_string())
            )));
        }

        // Stream membership first, then the repository as a whole, then the batch itself.
        let linked = self.stream_ids(stream);
        if let Some(id) = event_ids.iter().find(|id| linked.contains(*id)) {
            return Err(EventStoreError::duplicated(id, stream.name()));
        }
        if appending {
            if let Some(id) = event_ids.iter().find(|id| self.records.contains_key(*id)) {
                return Err(EventStoreError::duplicated(id, stream.name()));
            }
        }
        let mut seen = HashSet::with_capacity(event_ids.len());
        if let Some(id) = event_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EventStoreError::duplicated(id, stream.name()));
        }

        Ok(())
    }

    fn link(&mut self, event_ids: &[EventId], stream: &Stream, expected_version: ExpectedVersion) {
        if let Stream::Named(name) = stream {
            self.streams
                .entry(name.clone())
                .or_default()
                .extend_from_slice(event_ids);
            self.modes.insert(name.clone(), expected_version.into());
        }
    }

    /// Ids in scope of `specification`, ordered and past the cursor, limit not applied.
    ///
    /// The cursor must be part of the stream but need not pass the type filter.
    fn scope(&self, specification: &Specification) -> EventStoreResult<Vec<EventId>> {
        let mut ids: Vec<EventId> = self.stream_ids(specification.target()).to_vec();

        if !specification.is_forward() {
            ids.reverse();
        }

        if let Start::After(cursor) = specification.start() {
            let index = ids
                .iter()
                .position(|id| *id == cursor)
                .ok_or(EventStoreError::EventNotFound(cursor))?;
            ids.drain(..=index);
        }

        ids.retain(|id| {
            self.records
                .get(id)
                .is_some_and(|stored| specification.accepts(stored.record.event_type()))
        });
        Ok(ids)
    }
}

/// In-memory event repository.
///
/// Intended for tests/dev and as the reference behaviour for other backends. One lock
/// guards all state, which makes every write trivially atomic. Positions are always
/// dense, including for `any` writes.
///
/// By default mixing `any` with checked expected versions on one stream is tolerated;
/// [`with_strict_any_usage`](Self::with_strict_any_usage) turns that into
/// `UnsupportedVersionAnyUsage`.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    storage: RwLock<Storage>,
    strict_any_usage: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strict_any_usage(mut self, strict: bool) -> Self {
        self.strict_any_usage = strict;
        self
    }

    fn read_storage(&self) -> EventStoreResult<RwLockReadGuard<'_, Storage>> {
        self.storage
            .read()
            .map_err(|_| EventStoreError::backend("in-memory repository lock poisoned"))
    }

    fn write_storage(&self) -> EventStoreResult<RwLockWriteGuard<'_, Storage>> {
        self.storage
            .write()
            .map_err(|_| EventStoreError::backend("in-memory repository lock poisoned"))
    }
}

impl Repository for InMemoryRepository {
    fn append_to_stream(
        &self,
        records: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let event_ids: Vec<EventId> = records.iter().map(EventRecord::event_id).collect();
        let mut storage = self.write_storage()?;
        storage.check_write(&event_ids, stream, expected_version, true, self.strict_any_usage)?;

        for record in records {
            let event_id = record.event_id();
            let global_position = storage.global.len() as u64;
            storage.global.push(event_id);
            storage.records.insert(
                event_id,
                StoredRecord {
                    record,
                    global_position,
                },
            );
        }
        storage.link(&event_ids, stream, expected_version);
        Ok(())
    }

    fn link_to_stream(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let mut storage = self.write_storage()?;
        for id in event_ids {
            storage.record(*id)?;
        }
        storage.check_write(event_ids, stream, expected_version, false, self.strict_any_usage)?;
        storage.link(event_ids, stream, expected_version);
        Ok(())
    }

    fn delete_stream(&self, stream: &Stream) -> EventStoreResult<()> {
        let Stream::Named(name) = stream else {
            return Err(EventStoreError::ReservedInternalName(stream.name().to_string()));
        };
        let mut storage = self.write_storage()?;
        storage.streams.remove(name);
        storage.modes.remove(name);
        Ok(())
    }

    fn has_event(&self, event_id: EventId) -> EventStoreResult<bool> {
        Ok(self.read_storage()?.records.contains_key(&event_id))
    }

    fn last_stream_event(&self, stream: &Stream) -> EventStoreResult<Option<EventRecord>> {
        let storage = self.read_storage()?;
        let Some(last) = storage.stream_ids(stream).last() else {
            return Ok(None);
        };
        Ok(Some(storage.record(*last)?.record.clone()))
    }

    fn read(&self, specification: &Specification) -> EventStoreResult<Vec<EventRecord>> {
        let storage = self.read_storage()?;
        let ids = storage.scope(specification)?;
        let take = specification.max_count().unwrap_or(ids.len());
        ids.iter()
            .take(take)
            .map(|id| storage.record(*id).map(|stored| stored.record.clone()))
            .collect()
    }

    fn count(&self, specification: &Specification) -> EventStoreResult<usize> {
        Ok(self.read_storage()?.scope(specification)?.len())
    }

    fn read_event(&self, event_id: EventId) -> EventStoreResult<EventRecord> {
        Ok(self.read_storage()?.record(event_id)?.record.clone())
    }

    fn global_position(&self, event_id: EventId) -> EventStoreResult<u64> {
        Ok(self.read_storage()?.record(event_id)?.global_position)
    }

    fn position_in_stream(&self, event_id: EventId, stream: &Stream) -> EventStoreResult<Option<u64>> {
        let storage = self.read_storage()?;
        storage
            .stream_ids(stream)
            .iter()
            .position(|id| *id == event_id)
            .map(|p| Some(p as u64))
            .ok_or(EventStoreError::EventNotFound(event_id))
    }

    fn streams_of(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>> {
        let storage = self.read_storage()?;
        Ok(storage
            .streams
            .iter()
            .filter(|(_, ids)| ids.contains(&event_id))
            .map(|(name, _)| Stream::Named(name.clone()))
            .collect())
    }
}
