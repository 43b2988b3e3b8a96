//! Subscriptions scoped to one logical thread of work.

use eventline_core::EventStoreResult;

use crate::handler::Handler;
use crate::registry::{self, SharedRegistry, Subscription};
use crate::revocation::Revocation;

/// Holder of "thread-global" and "thread-local" subscriptions.
///
/// A context is an explicit value: the code that publishes within a unit of work passes
/// it to the broker, and only subscribers registered in that context (besides the
/// broker-wide ones) see those events. Clones share the same subscriptions, so a context
/// can be handed to helpers or moved across threads that take part in the same unit of
/// work.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionContext {
    registry: SharedRegistry,
}

impl SubscriptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to the given event types within this context.
    pub fn subscribe<I>(&self, handler: impl Into<Handler>, to: I) -> EventStoreResult<Revocation>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let types = to.into_iter().map(Into::into).collect();
        registry::subscribe(&self.registry, handler.into(), Some(types))
    }

    /// Subscribe `handler` to every event published within this context.
    pub fn subscribe_to_all_events(&self, handler: impl Into<Handler>) -> EventStoreResult<Revocation> {
        registry::subscribe(&self.registry, handler.into(), None)
    }

    /// Start a block of temporary subscriptions that are revoked once the block returns.
    pub fn within(&self) -> Within<'_> {
        Within {
            context: self,
            pending: Vec::new(),
        }
    }

    pub(crate) fn subscribers_for(
        &self,
        event_type: &str,
    ) -> EventStoreResult<(Vec<Subscription>, Vec<Subscription>)> {
        let registry = self.registry.read().map_err(|_| registry::poisoned())?;
        Ok((
            registry.global().to_vec(),
            registry.local(event_type).to_vec(),
        ))
    }
}

/// Builder returned by [`SubscriptionContext::within`].
#[derive(Debug)]
pub struct Within<'a> {
    context: &'a SubscriptionContext,
    pending: Vec<(Handler, Option<Vec<String>>)>,
}

impl Within<'_> {
    pub fn subscribe<I>(mut self, handler: impl Into<Handler>, to: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let types = to.into_iter().map(Into::into).collect();
        self.pending.push((handler.into(), Some(types)));
        self
    }

    pub fn subscribe_to_all_events(mut self, handler: impl Into<Handler>) -> Self {
        self.pending.push((handler.into(), None));
        self
    }

    /// Register the collected subscriptions, run `block`, then revoke them.
    ///
    /// Subscriptions are revoked even if `block` panics.
    pub fn call<T>(self, block: impl FnOnce() -> T) -> EventStoreResult<T> {
        let mut guard = RevokeOnDrop(Vec::with_capacity(self.pending.len()));
        for (handler, types) in self.pending {
            guard.0.push(registry::subscribe(&self.context.registry, handler, types)?);
        }
        Ok(block())
    }
}

struct RevokeOnDrop(Vec<Revocation>);

impl Drop for RevokeOnDrop {
    fn drop(&mut self) {
        for revocation in &self.0 {
            revocation.revoke();
        }
    }
}
