//! Redis-backed external queue, in the layout sidekiq reads.
//!
//! - **Queue Key**: `queue:<name>`, a list; payloads are pushed with one `LPUSH` per
//!   batch group
//! - **Known Queues**: `queues`, a set; split keys are added with `SADD`

use std::sync::Arc;

use tracing::instrument;

use super::error::QueueError;
use super::queue::ExternalQueue;

const KNOWN_QUEUES_KEY: &str = "queues";

#[derive(Debug, Clone)]
pub struct RedisQueue {
    client: Arc<redis::Client>,
}

impl RedisQueue {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn connection(&self) -> Result<redis::Connection, QueueError> {
        self.client
            .get_connection()
            .map_err(|e| QueueError::Connection(e.to_string()))
    }
}

impl ExternalQueue for RedisQueue {
    #[instrument(skip(self, payloads), fields(queue = %queue, count = payloads.len()), err)]
    fn push(&self, queue: &str, payloads: &[String]) -> Result<(), QueueError> {
        if payloads.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(payloads)
            .query(&mut conn)
            .map_err(|e| QueueError::Push {
                queue: queue.to_string(),
                reason: format!("LPUSH failed: {}", e),
            })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    fn register_queues(&self, queues: &[String]) -> Result<(), QueueError> {
        if queues.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("SADD")
            .arg(KNOWN_QUEUES_KEY)
            .arg(queues)
            .query(&mut conn)
            .map_err(|e| QueueError::Register(format!("SADD failed: {}", e)))?;

        Ok(())
    }
}
