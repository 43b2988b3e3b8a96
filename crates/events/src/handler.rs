//! Subscriber handles as stored by the broker.

use std::fmt;
use std::sync::Arc;

use eventline_core::{EventRecord, EventStoreError, EventStoreResult};
use thiserror::Error;

use crate::subscriber::Subscriber;

/// Why a subscriber factory could not produce a subscriber.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("subscriber factory produced no subscriber")]
    Missing,
    #[error("{0}")]
    Invalid(String),
}

impl From<HandlerError> for EventStoreError {
    fn from(value: HandlerError) -> Self {
        match value {
            HandlerError::Missing => EventStoreError::SubscriberNotExist,
            HandlerError::Invalid(reason) => EventStoreError::InvalidHandler(reason),
        }
    }
}

type Factory = dyn Fn() -> Result<Box<dyn Subscriber>, HandlerError> + Send + Sync;

/// A registered subscriber.
///
/// Either a shared instance invoked for every event, or a factory that builds a fresh
/// subscriber for each dispatch. Factories are probed once when subscribing so that a
/// misconfigured factory is rejected up front instead of failing on every event.
#[derive(Clone)]
pub enum Handler {
    Instance(Arc<dyn Subscriber>),
    Factory(Arc<Factory>),
}

impl Handler {
    pub fn new<S>(subscriber: S) -> Self
    where
        S: Subscriber + 'static,
    {
        Self::Instance(Arc::new(subscriber))
    }

    /// Wrap a closure. Prefer this over [`Handler::new`] for closures so their signature
    /// is inferred.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&EventRecord) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Instance(Arc::new(f))
    }

    pub fn shared(subscriber: Arc<dyn Subscriber>) -> Self {
        Self::Instance(subscriber)
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Subscriber>, HandlerError> + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(factory))
    }

    /// Check the handler can produce a subscriber.
    pub fn verify(&self) -> EventStoreResult<()> {
        match self {
            Self::Instance(_) => Ok(()),
            Self::Factory(factory) => factory().map(drop).map_err(Into::into),
        }
    }

    pub(crate) fn invoke(&self, event: &EventRecord) -> anyhow::Result<()> {
        match self {
            Self::Instance(subscriber) => subscriber.call(event),
            Self::Factory(factory) => {
                let subscriber = factory()?;
                subscriber.call(event)
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Handler::Instance"),
            Self::Factory(_) => f.write_str("Handler::Factory"),
        }
    }
}

impl<S> From<Arc<S>> for Handler
where
    S: Subscriber + 'static,
{
    fn from(value: Arc<S>) -> Self {
        Self::Instance(value)
    }
}
