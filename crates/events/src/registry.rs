//! Subscription bookkeeping shared by the broker and subscription contexts.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use eventline_core::{EventStoreError, EventStoreResult};

use crate::handler::Handler;
use crate::revocation::Revocation;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one `subscribe` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A handler together with the id of the subscription that registered it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// Global and per-type subscriber lists, each kept in registration order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    global: Vec<Subscription>,
    local: HashMap<String, Vec<Subscription>>,
}

impl Registry {
    fn add(&mut self, handler: Handler, event_types: Option<Vec<String>>) -> SubscriptionId {
        let id = SubscriptionId::next();
        match event_types {
            None => self.global.push(Subscription { id, handler }),
            Some(types) => {
                let mut seen = HashSet::with_capacity(types.len());
                for event_type in types.into_iter().filter(|t| seen.insert(t.clone())) {
                    self.local.entry(event_type).or_default().push(Subscription {
                        id,
                        handler: handler.clone(),
                    });
                }
            }
        }
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) {
        self.global.retain(|s| s.id != id);
        self.local.retain(|_, subs| {
            subs.retain(|s| s.id != id);
            !subs.is_empty()
        });
    }

    pub(crate) fn global(&self) -> &[Subscription] {
        &self.global
    }

    pub(crate) fn local(&self, event_type: &str) -> &[Subscription] {
        self.local.get(event_type).map(Vec::as_slice).unwrap_or_default()
    }
}

pub(crate) type SharedRegistry = Arc<RwLock<Registry>>;

/// Verify `handler` and register it, returning the handle that undoes the registration.
pub(crate) fn subscribe(
    registry: &SharedRegistry,
    handler: Handler,
    event_types: Option<Vec<String>>,
) -> EventStoreResult<Revocation> {
    handler.verify()?;
    let id = registry.write().map_err(|_| poisoned())?.add(handler, event_types);
    Ok(Revocation::new(id, Arc::downgrade(registry)))
}

pub(crate) fn poisoned() -> EventStoreError {
    EventStoreError::backend("subscription registry lock poisoned")
}
