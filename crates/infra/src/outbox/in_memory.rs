//! In-memory outbox store for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::error::OutboxError;
use super::record::OutboxRecord;
use super::store::{BatchFilter, LockedBatch, OutboxStore};

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<i64, OutboxRecord>,
    last_id: i64,
    /// Row id -> token of the batch holding its lock.
    locks: HashMap<i64, u64>,
    last_token: u64,
}

/// In-memory outbox table with row-level locking.
///
/// Lock waits are not modelled: a batch whose candidate rows are held by another open
/// batch fails immediately with [`OutboxError::LockTimeout`], as if the wait had run out.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    state: Mutex<State>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending row and return its id.
    pub fn insert(
        &self,
        split_key: Option<&str>,
        format: &str,
        payload: impl Into<String>,
    ) -> Result<i64, OutboxError> {
        let mut state = self.state()?;
        state.last_id += 1;
        let id = state.last_id;
        state.rows.insert(
            id,
            OutboxRecord {
                id,
                split_key: split_key.map(str::to_string),
                format: format.to_string(),
                payload: payload.into(),
                created_at: Utc::now(),
                enqueued_at: None,
            },
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Option<OutboxRecord>, OutboxError> {
        Ok(self.state()?.rows.get(&id).cloned())
    }

    /// All rows in id order.
    pub fn records(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        Ok(self.state()?.rows.values().cloned().collect())
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, OutboxError> {
        self.state
            .lock()
            .map_err(|_| OutboxError::Storage("outbox state lock poisoned".to_string()))
    }

    fn release(&self, token: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.locks.retain(|_, holder| *holder != token);
        }
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn lock_batch(&self, filter: &BatchFilter) -> Result<Box<dyn LockedBatch + '_>, OutboxError> {
        let mut state = self.state()?;

        // Rows are locked in id order; the first row held elsewhere blocks the scan.
        let mut selected = Vec::new();
        for record in state.rows.values().filter(|record| filter.matches(record)) {
            if selected.len() >= filter.limit {
                break;
            }
            if state.locks.contains_key(&record.id) {
                return Err(OutboxError::LockTimeout);
            }
            selected.push(record.clone());
        }

        state.last_token += 1;
        let token = state.last_token;
        for record in &selected {
            state.locks.insert(record.id, token);
        }

        Ok(Box::new(InMemoryBatch {
            store: self,
            token,
            records: selected,
            stamps: Vec::new(),
        }))
    }
}

struct InMemoryBatch<'a> {
    store: &'a InMemoryOutboxStore,
    token: u64,
    records: Vec<OutboxRecord>,
    stamps: Vec<(i64, DateTime<Utc>)>,
}

impl LockedBatch for InMemoryBatch<'_> {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    fn mark_enqueued(&mut self, ids: &[i64], at: DateTime<Utc>) -> Result<(), OutboxError> {
        for id in ids {
            if self.records.iter().any(|record| record.id == *id) {
                self.stamps.push((*id, at));
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), OutboxError> {
        let mut state = self.store.state()?;
        for (id, at) in &self.stamps {
            if let Some(row) = state.rows.get_mut(id) {
                row.enqueued_at = Some(*at);
            }
        }
        drop(state);
        // Locks are released by Drop.
        Ok(())
    }
}

impl Drop for InMemoryBatch<'_> {
    fn drop(&mut self) {
        self.store.release(self.token);
    }
}
