//! External job queue the outbox relays into.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::QueueError;

/// Destination of relayed outbox payloads.
pub trait ExternalQueue: Send + Sync {
    /// Push `payloads` onto `queue` in one operation.
    fn push(&self, queue: &str, payloads: &[String]) -> Result<(), QueueError>;

    /// Add `queues` to the set of known queue names.
    fn register_queues(&self, queues: &[String]) -> Result<(), QueueError>;
}

impl<Q> ExternalQueue for Arc<Q>
where
    Q: ExternalQueue + ?Sized,
{
    fn push(&self, queue: &str, payloads: &[String]) -> Result<(), QueueError> {
        (**self).push(queue, payloads)
    }

    fn register_queues(&self, queues: &[String]) -> Result<(), QueueError> {
        (**self).register_queues(queues)
    }
}

#[derive(Debug, Default)]
struct Queues {
    messages: HashMap<String, Vec<String>>,
    known: BTreeSet<String>,
    failing: HashSet<String>,
}

/// Queue kept in process memory.
///
/// Messages are kept in push order per queue. Individual queues can be switched to
/// reject pushes with [`fail_pushes_to`](Self::fail_pushes_to).
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    inner: Mutex<Queues>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages pushed to `queue` so far, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<String> {
        self.inner()
            .messages
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Every queue that received at least one message, with its messages.
    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.inner().messages.clone()
    }

    pub fn known_queues(&self) -> Vec<String> {
        self.inner().known.iter().cloned().collect()
    }

    pub fn fail_pushes_to(&self, queue: impl Into<String>) {
        self.inner().failing.insert(queue.into());
    }

    fn inner(&self) -> MutexGuard<'_, Queues> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ExternalQueue for InMemoryQueue {
    fn push(&self, queue: &str, payloads: &[String]) -> Result<(), QueueError> {
        let mut inner = self.inner();
        if inner.failing.contains(queue) {
            return Err(QueueError::Push {
                queue: queue.to_string(),
                reason: "queue unavailable".to_string(),
            });
        }
        inner
            .messages
            .entry(queue.to_string())
            .or_default()
            .extend(payloads.iter().cloned());
        Ok(())
    }

    fn register_queues(&self, queues: &[String]) -> Result<(), QueueError> {
        self.inner().known.extend(queues.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_accumulate_per_queue() {
        let queue = InMemoryQueue::new();
        queue.push("default", &["a".to_string(), "b".to_string()]).unwrap();
        queue.push("default", &["c".to_string()]).unwrap();
        queue.push("mailers", &["m".to_string()]).unwrap();

        assert_eq!(queue.messages("default"), vec!["a", "b", "c"]);
        assert_eq!(queue.messages("mailers"), vec!["m"]);
        assert!(queue.messages("other").is_empty());
    }

    #[test]
    fn failing_queue_rejects_pushes() {
        let queue = InMemoryQueue::new();
        queue.fail_pushes_to("default");
        let err = queue.push("default", &["a".to_string()]).unwrap_err();
        assert!(matches!(err, QueueError::Push { .. }));
        assert!(queue.messages("default").is_empty());
    }

    #[test]
    fn registration_is_a_set() {
        let queue = InMemoryQueue::new();
        queue
            .register_queues(&["default".to_string(), "mailers".to_string()])
            .unwrap();
        queue.register_queues(&["default".to_string()]).unwrap();
        assert_eq!(queue.known_queues(), vec!["default", "mailers"]);
    }
}
