//! Folding stored events into a value.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use eventline_core::{EventRecord, EventStoreError, EventStoreResult, Stream};
use eventline_events::Subscriber;

use crate::event_store::Repository;
use crate::specification::{Specification, Start};

type Init<S> = dyn Fn() -> S + Send + Sync;
type Reducer<S> = dyn Fn(&mut S, &EventRecord) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Streams(Vec<Stream>),
    AllStreams,
}

/// A left fold over events, with one reducer per handled event type.
///
/// [`run`](Self::run) replays the source (some named streams, one after the other, or
/// the global stream) through the reducers, starting from the state built by
/// [`init`](Self::init) (`S::default()` unless set). Events of other types are skipped.
///
/// A projection is also a [`Subscriber`]: subscribed to its
/// [`handled_events`](Self::handled_events), it keeps folding published events into
/// [`current_state`](Self::current_state).
///
/// ```ignore
/// let balance = Projection::from_stream(["Customer$123"])?
///     .init(|| 0_i64)
///     .when("MoneyDeposited", |total, e| *total += e.data()["amount"].as_i64().unwrap_or(0))
///     .when("MoneyWithdrawn", |total, e| *total -= e.data()["amount"].as_i64().unwrap_or(0))
///     .run(client.repository())?;
/// ```
pub struct Projection<S> {
    source: Source,
    init: Box<Init<S>>,
    reducers: BTreeMap<String, Box<Reducer<S>>>,
    current: Mutex<Option<S>>,
}

impl<S: Default + 'static> Projection<S> {
    /// Fold the given named streams in order. At least one stream is required.
    pub fn from_stream<I>(streams: I) -> EventStoreResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let streams = streams
            .into_iter()
            .map(|name| Stream::new(name))
            .collect::<EventStoreResult<Vec<_>>>()?;
        if streams.is_empty() {
            return Err(EventStoreError::IncorrectStreamData);
        }
        Ok(Self::with_source(Source::Streams(streams)))
    }

    /// Fold the global stream.
    pub fn from_all_streams() -> Self {
        Self::with_source(Source::AllStreams)
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            init: Box::new(S::default),
            reducers: BTreeMap::new(),
            current: Mutex::new(None),
        }
    }
}

impl<S> Projection<S> {
    pub fn init(mut self, init: impl Fn() -> S + Send + Sync + 'static) -> Self {
        self.init = Box::new(init);
        self
    }

    /// Reduce events of `event_type` with `reducer`. A later call for the same type
    /// replaces the earlier reducer.
    pub fn when(
        mut self,
        event_type: impl Into<String>,
        reducer: impl Fn(&mut S, &EventRecord) + Send + Sync + 'static,
    ) -> Self {
        self.reducers.insert(event_type.into(), Box::new(reducer));
        self
    }

    /// Event types with a reducer, sorted.
    pub fn handled_events(&self) -> Vec<String> {
        self.reducers.keys().cloned().collect()
    }

    /// Fold every event of the source.
    pub fn run<R: Repository>(&self, repository: &R) -> EventStoreResult<S> {
        let starts = vec![Start::Head; self.scopes().len()];
        self.run_from(repository, &starts, None)
    }

    /// Fold from the given starts, reading at most `limit` handled events per stream.
    ///
    /// Takes one start per stream for [`from_stream`](Projection::from_stream)
    /// projections and exactly one for [`from_all_streams`](Projection::from_all_streams);
    /// anything else is `InvalidProjectionStart`. A cursor that is not part of its
    /// stream is `EventNotFound`.
    pub fn run_from<R: Repository>(
        &self,
        repository: &R,
        starts: &[Start],
        limit: Option<usize>,
    ) -> EventStoreResult<S> {
        let scopes = self.scopes();
        if starts.len() != scopes.len() {
            return Err(EventStoreError::InvalidProjectionStart(format!(
                "expected {} start(s), got {}",
                scopes.len(),
                starts.len()
            )));
        }

        let mut state = (self.init)();
        for (stream, start) in scopes.into_iter().zip(starts) {
            let mut specification = Specification::new()
                .in_stream(stream)
                .of_type(self.reducers.keys().cloned());
            if let Start::After(cursor) = start {
                specification = specification.from(*cursor);
            }
            if let Some(limit) = limit {
                specification = specification.limit(limit)?;
            }
            for event in repository.read(&specification)? {
                self.apply(&mut state, &event);
            }
        }
        Ok(state)
    }

    /// State folded from every event received as a subscriber so far.
    pub fn current_state(&self) -> S
    where
        S: Clone,
    {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        current.get_or_insert_with(|| (self.init)()).clone()
    }

    fn scopes(&self) -> Vec<Stream> {
        match &self.source {
            Source::Streams(streams) => streams.clone(),
            Source::AllStreams => vec![Stream::Global],
        }
    }

    fn apply(&self, state: &mut S, event: &EventRecord) {
        if let Some(reducer) = self.reducers.get(event.event_type()) {
            reducer(state, event);
        }
    }
}

impl<S: Send> Subscriber for Projection<S> {
    fn call(&self, event: &EventRecord) -> anyhow::Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("projection state lock poisoned"))?;
        let state = current.get_or_insert_with(|| (self.init)());
        self.apply(state, event);
        Ok(())
    }
}

impl<S> fmt::Debug for Projection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("source", &self.source)
            .field("handled_events", &self.handled_events())
            .finish_non_exhaustive()
    }
}
