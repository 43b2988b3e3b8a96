use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only message format the consumer relays.
pub const SIDEKIQ5_FORMAT: &str = "sidekiq5";

/// A row of the outbox table.
///
/// `enqueued_at` is `None` until the consumer has relayed the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub split_key: Option<String>,
    pub format: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn is_enqueued(&self) -> bool {
        self.enqueued_at.is_some()
    }
}
