//! Immutable, directional read queries.

use serde::{Deserialize, Serialize};

use eventline_core::{EventId, EventStoreError, EventStoreResult, Stream};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Where a read begins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Start {
    /// The beginning of the stream in the read direction.
    #[default]
    Head,
    /// Right after this event (exclusive cursor).
    After(EventId),
}

/// What to read: one stream or the global stream, in which direction, from where and
/// how much.
///
/// Every builder method returns a new specification; the original is left untouched.
/// An unset limit means "everything".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specification {
    stream: Stream,
    direction: Direction,
    start: Start,
    limit: Option<usize>,
    event_types: Option<Vec<String>>,
}

impl Default for Specification {
    fn default() -> Self {
        Self {
            stream: Stream::Global,
            direction: Direction::Forward,
            start: Start::Head,
            limit: None,
            event_types: None,
        }
    }
}

impl Specification {
    /// Everything in the global stream, oldest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a named stream.
    ///
    /// Fails with `ReservedInternalName` for the global stream's name.
    pub fn stream(self, name: impl Into<String>) -> EventStoreResult<Self> {
        Ok(self.in_stream(Stream::new(name)?))
    }

    pub fn in_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn global(self) -> Self {
        self.in_stream(Stream::Global)
    }

    pub fn forward(mut self) -> Self {
        self.direction = Direction::Forward;
        self
    }

    pub fn backward(mut self) -> Self {
        self.direction = Direction::Backward;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Start right after `event_id`.
    pub fn from(mut self, event_id: EventId) -> Self {
        self.start = Start::After(event_id);
        self
    }

    pub fn from_head(mut self) -> Self {
        self.start = Start::Head;
        self
    }

    /// Read at most `count` records. Zero is rejected with `InvalidPageSize`.
    pub fn limit(mut self, count: usize) -> EventStoreResult<Self> {
        if count == 0 {
            return Err(EventStoreError::InvalidPageSize(count));
        }
        self.limit = Some(count);
        Ok(self)
    }

    pub fn unlimited(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Only return events of these types.
    pub fn of_type<I>(mut self, types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn target(&self) -> &Stream {
        &self.stream
    }

    pub fn read_direction(&self) -> Direction {
        self.direction
    }

    pub fn is_forward(&self) -> bool {
        self.direction == Direction::Forward
    }

    pub fn start(&self) -> Start {
        self.start
    }

    pub fn max_count(&self) -> Option<usize> {
        self.limit
    }

    pub fn event_types(&self) -> Option<&[String]> {
        self.event_types.as_deref()
    }

    /// Whether `event_type` passes the type filter.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.event_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == event_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_do_not_mutate_the_original() {
        let base = Specification::new();
        let narrowed = base.clone().stream("Order-1").unwrap().backward().limit(10).unwrap();

        assert_eq!(base, Specification::new());
        assert!(base.target().is_global());
        assert_eq!(narrowed.target().name(), "Order-1");
        assert_eq!(narrowed.read_direction(), Direction::Backward);
        assert_eq!(narrowed.max_count(), Some(10));
    }

    #[test]
    fn rejects_zero_limit_and_reserved_stream() {
        assert_eq!(
            Specification::new().limit(0),
            Err(EventStoreError::InvalidPageSize(0))
        );
        assert_eq!(
            Specification::new().stream("all"),
            Err(EventStoreError::ReservedInternalName("all".into()))
        );
    }

    #[test]
    fn type_filter() {
        let spec = Specification::new().of_type(["OrderCreated"]);
        assert!(spec.accepts("OrderCreated"));
        assert!(!spec.accepts("OrderExpired"));
        assert!(Specification::new().accepts("Anything"));
    }
}
