//! In-process fan-out of published events.

use eventline_core::{EventRecord, EventStoreResult};
use tracing::debug;

use crate::context::SubscriptionContext;
use crate::dispatcher::Dispatcher;
use crate::handler::Handler;
use crate::registry::{self, SharedRegistry, Subscription};
use crate::revocation::Revocation;

/// Synchronous publish/subscribe broker.
///
/// ## Scopes
///
/// - **global**: every event, process-wide
/// - **local**: events of the declared types, process-wide
/// - **context global / context local**: the same two scopes, but held by a
///   [`SubscriptionContext`] and only consulted when that context is passed to
///   [`notify_subscribers_in`](Broker::notify_subscribers_in)
///
/// For one event the subscribers run in this order: global, local for the event's type,
/// context global, context local for the type. Within each scope registration order is
/// kept. A subscriber registered in several matching scopes runs once per scope.
#[derive(Debug, Default)]
pub struct Broker {
    registry: SharedRegistry,
    dispatcher: Dispatcher,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            registry: SharedRegistry::default(),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Subscribe `handler` to events of the given types.
    pub fn subscribe<I>(&self, handler: impl Into<Handler>, to: I) -> EventStoreResult<Revocation>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let handler = handler.into();
        self.dispatcher.verify(&handler)?;
        let types = to.into_iter().map(Into::into).collect();
        registry::subscribe(&self.registry, handler, Some(types))
    }

    pub fn subscribe_to_all_events(&self, handler: impl Into<Handler>) -> EventStoreResult<Revocation> {
        let handler = handler.into();
        self.dispatcher.verify(&handler)?;
        registry::subscribe(&self.registry, handler, None)
    }

    /// Everything that would receive an event of `event_type`, in dispatch order.
    pub fn subscribers_for(
        &self,
        event_type: &str,
        context: Option<&SubscriptionContext>,
    ) -> EventStoreResult<Vec<Subscription>> {
        let mut all = {
            let registry = self.registry.read().map_err(|_| registry::poisoned())?;
            let mut all = registry.global().to_vec();
            all.extend_from_slice(registry.local(event_type));
            all
        };
        if let Some(context) = context {
            let (global, local) = context.subscribers_for(event_type)?;
            all.extend(global);
            all.extend(local);
        }
        Ok(all)
    }

    /// Dispatch `event` to the process-wide subscribers.
    pub fn notify_subscribers(&self, event: &EventRecord) -> EventStoreResult<()> {
        self.dispatch(event, None)
    }

    /// Dispatch `event` to the process-wide subscribers and those held by `context`.
    pub fn notify_subscribers_in(
        &self,
        context: &SubscriptionContext,
        event: &EventRecord,
    ) -> EventStoreResult<()> {
        self.dispatch(event, Some(context))
    }

    fn dispatch(&self, event: &EventRecord, context: Option<&SubscriptionContext>) -> EventStoreResult<()> {
        // Snapshot first: subscribers may subscribe or revoke while running.
        let subscribers = self.subscribers_for(event.event_type(), context)?;
        debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            subscribers = subscribers.len(),
            "notifying subscribers"
        );
        for subscription in &subscribers {
            self.dispatcher.call(subscription, event)?;
        }
        Ok(())
    }
}
