//! Transactional outbox relay.
//!
//! Application transactions write job payloads into an outbox table alongside their
//! own changes. The [`Consumer`] relays pending rows into an [`ExternalQueue`] and
//! stamps them, so a payload reaches the queue if and only if its transaction
//! committed (at least once; a crash between push and commit re-sends).
//!
//! Backends:
//! - [`InMemoryOutboxStore`] / [`InMemoryQueue`]: tests and local development
//! - [`PostgresOutboxStore`]: row locks with a bounded lock wait
//! - `RedisQueue` (feature `redis`): sidekiq-compatible lists

pub mod consumer;
pub mod error;
pub mod in_memory;
pub mod metrics;
pub mod postgres;
pub mod queue;
pub mod record;
#[cfg(feature = "redis")]
pub mod redis_queue;
pub mod store;

pub use consumer::{
    Consumer, ConsumerConfig, ConsumerHandle, DEFAULT_BATCH_SIZE, SLEEP_WHEN_IDLE,
};
pub use error::{ConfigError, OutboxError, QueueError};
pub use in_memory::InMemoryOutboxStore;
pub use metrics::{LogMetrics, NullMetrics, OutboxMetrics, QueueStatus};
pub use postgres::{DEFAULT_LOCK_TIMEOUT, PostgresOutboxStore};
pub use queue::{ExternalQueue, InMemoryQueue};
pub use record::{OutboxRecord, SIDEKIQ5_FORMAT};
#[cfg(feature = "redis")]
pub use redis_queue::RedisQueue;
pub use store::{BatchFilter, LockedBatch, OutboxStore};
