use thiserror::Error;

/// Failures of an outbox store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// Waiting for row locks exceeded the configured lock timeout.
    #[error("outbox row lock timeout")]
    LockTimeout,

    #[error("outbox fetch deadlocked")]
    Deadlock,

    #[error("outbox storage error: {0}")]
    Storage(String),

    #[error("outbox record {id} has a malformed payload: {reason}")]
    Decode { id: i64, reason: String },
}

impl OutboxError {
    /// Lock contention the consumer recovers from by trying again next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::Deadlock)
    }
}

/// Failures of the external queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("push to queue '{queue}' failed: {reason}")]
    Push { queue: String, reason: String },

    #[error("queue registration failed: {0}")]
    Register(String),
}

/// Invalid consumer configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported message format '{0}' (only sidekiq5 is supported)")]
    UnsupportedFormat(String),

    #[error("batch size must be positive")]
    InvalidBatchSize,

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
