use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, Weak};

use crate::registry::{Registry, SubscriptionId};

/// Handle returned by every `subscribe` call.
///
/// [`revoke`](Revocation::revoke) removes exactly the subscription it was created for and
/// may be called any number of times. Dropping the handle does not revoke anything: the
/// subscription lives until revoked or until its broker/context is dropped.
#[derive(Debug)]
pub struct Revocation {
    id: SubscriptionId,
    registry: Weak<RwLock<Registry>>,
    revoked: AtomicBool,
}

impl Revocation {
    pub(crate) fn new(id: SubscriptionId, registry: Weak<RwLock<Registry>>) -> Self {
        Self {
            id,
            registry,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        if self.revoked.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // A poisoned registry can no longer dispatch anyway.
        if let Ok(mut registry) = registry.write() {
            registry.remove(self.id);
        }
    }
}
