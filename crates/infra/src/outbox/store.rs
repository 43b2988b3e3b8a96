use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::OutboxError;
use super::record::OutboxRecord;

/// Which rows a consumer cycle picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFilter {
    pub format: String,
    /// `None` selects every split key.
    pub split_keys: Option<Vec<String>>,
    pub limit: usize,
}

impl BatchFilter {
    pub fn matches(&self, record: &OutboxRecord) -> bool {
        record.enqueued_at.is_none()
            && record.format == self.format
            && self.split_keys.as_ref().is_none_or(|keys| {
                record
                    .split_key
                    .as_ref()
                    .is_some_and(|key| keys.contains(key))
            })
    }
}

/// Outbox table storage.
///
/// `lock_batch` selects up to `filter.limit` pending rows in ascending id order and
/// holds exclusive row locks on them until the returned batch is committed or dropped.
/// Rows locked by another open batch make the call wait; when the wait exceeds the
/// store's lock timeout it fails with [`OutboxError::LockTimeout`].
pub trait OutboxStore: Send + Sync {
    fn lock_batch(&self, filter: &BatchFilter) -> Result<Box<dyn LockedBatch + '_>, OutboxError>;
}

/// A set of locked outbox rows.
///
/// Dropping a batch without committing rolls it back: locks are released and nothing
/// is stamped.
pub trait LockedBatch {
    fn records(&self) -> &[OutboxRecord];

    /// Stamp `enqueued_at` on the given rows when the batch commits.
    fn mark_enqueued(&mut self, ids: &[i64], at: DateTime<Utc>) -> Result<(), OutboxError>;

    fn commit(self: Box<Self>) -> Result<(), OutboxError>;
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn lock_batch(&self, filter: &BatchFilter) -> Result<Box<dyn LockedBatch + '_>, OutboxError> {
        (**self).lock_batch(filter)
    }
}
