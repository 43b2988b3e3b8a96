//! Invoking one subscriber with failure isolation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use eventline_core::{EventRecord, EventStoreError, EventStoreResult};
use tracing::error;

use crate::handler::Handler;
use crate::registry::Subscription;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Return the first subscriber failure to the publisher instead of logging it and
    /// moving on to the next subscriber.
    pub propagate_failures: bool,
}

impl DispatcherConfig {
    pub fn with_propagate_failures(mut self, propagate: bool) -> Self {
        self.propagate_failures = propagate;
        self
    }
}

/// Calls subscribers on the publishing thread.
///
/// Errors and panics raised by a subscriber are caught and logged, so one faulty
/// subscriber never prevents the others from seeing the event.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    pub fn verify(&self, handler: &Handler) -> EventStoreResult<()> {
        handler.verify()
    }

    pub fn call(&self, subscription: &Subscription, event: &EventRecord) -> EventStoreResult<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscription.handler().invoke(event)));
        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        error!(
            subscription = %subscription.id(),
            event_id = %event.event_id(),
            event_type = event.event_type(),
            error = %failure,
            "subscriber failed"
        );

        if self.config.propagate_failures {
            Err(EventStoreError::SubscriberFailed(failure))
        } else {
            Ok(())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
