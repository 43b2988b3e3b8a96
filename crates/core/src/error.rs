//! Event store error taxonomy.

use thiserror::Error;

use crate::id::EventId;

/// Result type used across the event store layers.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Every failure the repository, reader, broker and facade can report.
///
/// Storage adapters translate their native errors into this enum at the repository
/// boundary, so callers never see raw backend errors.
///
/// ## Error Categories
///
/// - **Concurrency conflicts** (`WrongExpectedVersion`, `EventDuplicatedInStream`,
///   `UnsupportedVersionAnyUsage`): recoverable by re-reading the stream version and
///   retrying, or by treating a duplicate as already applied
/// - **Not found** (`EventNotFound`, `ReservedInternalName`): caller errors
/// - **Input validation** (`IncorrectStreamData`, `InvalidExpectedVersion`,
///   `InvalidEventId`, `InvalidPageSize`, `InvalidProjectionStart`): rejected up front,
///   never coerced
/// - **Subscriber misconfiguration** (`InvalidHandler`, `SubscriberNotExist`): detected
///   when subscribing, not when dispatching
/// - **Subscriber failure** (`SubscriberFailed`): only surfaced when the dispatcher is
///   configured to propagate failures
/// - **Serialization** (`Serialization`): a typed event could not be turned into a payload
/// - **Backend** (`Backend`): storage failures with no counterpart above
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("wrong expected version: {0}")]
    WrongExpectedVersion(String),

    #[error("event {event_id} already present in stream '{stream}'")]
    EventDuplicatedInStream { event_id: String, stream: String },

    #[error("mixing expected version `any` with other modes is not supported (stream '{0}')")]
    UnsupportedVersionAnyUsage(String),

    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("'{0}' is a reserved internal name")]
    ReservedInternalName(String),

    #[error("incorrect stream data: stream name must not be empty")]
    IncorrectStreamData,

    #[error("invalid expected version: {0}")]
    InvalidExpectedVersion(String),

    #[error("invalid event id: {0}")]
    InvalidEventId(String),

    #[error("invalid page size: {0}")]
    InvalidPageSize(usize),

    #[error("invalid projection start: {0}")]
    InvalidProjectionStart(String),

    #[error("invalid handler: {0}")]
    InvalidHandler(String),

    #[error("subscriber does not exist")]
    SubscriberNotExist,

    #[error("subscriber failed: {0}")]
    SubscriberFailed(String),

    #[error("event payload serialization failed: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn wrong_expected_version(msg: impl Into<String>) -> Self {
        Self::WrongExpectedVersion(msg.into())
    }

    pub fn duplicated(event_id: impl ToString, stream: impl Into<String>) -> Self {
        Self::EventDuplicatedInStream {
            event_id: event_id.to_string(),
            stream: stream.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether the caller may resolve the failure by re-reading and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            Self::WrongExpectedVersion(_)
                | Self::EventDuplicatedInStream { .. }
                | Self::UnsupportedVersionAnyUsage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflicts_are_classified() {
        assert!(EventStoreError::wrong_expected_version("x").is_concurrency_conflict());
        assert!(EventStoreError::duplicated(EventId::new(), "s").is_concurrency_conflict());
        assert!(!EventStoreError::IncorrectStreamData.is_concurrency_conflict());
        assert!(!EventStoreError::EventNotFound(EventId::new()).is_concurrency_conflict());
    }
}
