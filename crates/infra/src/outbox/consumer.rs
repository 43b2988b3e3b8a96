//! Relays outbox rows into the external queue.
//!
//! Each cycle locks a batch of pending rows, pushes their payloads grouped by target
//! queue, stamps the rows that made it and commits. A row that cannot be relayed
//! (malformed payload, no target queue, failed push) stays pending and is retried on a
//! later cycle; it never blocks the rest of its batch.

use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info, warn};

use super::error::{ConfigError, OutboxError, QueueError};
use super::metrics::{NullMetrics, OutboxMetrics, QueueStatus};
use super::queue::ExternalQueue;
use super::record::{OutboxRecord, SIDEKIQ5_FORMAT};
use super::store::{BatchFilter, OutboxStore};
use crate::clock::{Clock, SystemClock};

/// Pause after a cycle that relayed nothing.
pub const SLEEP_WHEN_IDLE: Duration = Duration::from_millis(100);

pub const DEFAULT_BATCH_SIZE: usize = 100;

const QUEUE_KEY: &str = "queue";
const ENQUEUED_AT_KEY: &str = "enqueued_at";

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Split keys this consumer handles; `None` handles all of them.
    pub split_keys: Option<Vec<String>>,
    pub message_format: String,
    pub batch_size: usize,
    pub sleep_when_idle: Duration,
    /// Name for logging and the worker thread.
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            split_keys: None,
            message_format: SIDEKIQ5_FORMAT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            sleep_when_idle: SLEEP_WHEN_IDLE,
            name: "outbox-consumer".to_string(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_split_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.split_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_all_split_keys(mut self) -> Self {
        self.split_keys = None;
        self
    }

    pub fn with_message_format(mut self, format: impl Into<String>) -> Self {
        self.message_format = format.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_sleep_when_idle(mut self, sleep: Duration) -> Self {
        self.sleep_when_idle = sleep;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_format != SIDEKIQ5_FORMAT {
            return Err(ConfigError::UnsupportedFormat(self.message_format.clone()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }

    fn filter(&self) -> BatchFilter {
        BatchFilter {
            format: self.message_format.clone(),
            split_keys: self.split_keys.clone(),
            limit: self.batch_size,
        }
    }
}

/// Handle to control a running consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the in-flight cycle to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Outcome of relaying one batch.
#[derive(Debug, Default)]
struct Relay {
    enqueued: Vec<i64>,
    failed: Vec<i64>,
}

/// Outbox consumer.
pub struct Consumer<S, Q> {
    config: ConsumerConfig,
    store: S,
    queue: Q,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn OutboxMetrics>,
}

impl<S, Q> core::fmt::Debug for Consumer<S, Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, Q> Consumer<S, Q>
where
    S: OutboxStore,
    Q: ExternalQueue,
{
    pub fn new(config: ConsumerConfig, store: S, queue: Q) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            queue,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NullMetrics),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn OutboxMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Announce the handled split keys to the queue.
    pub fn init(&self) -> Result<(), QueueError> {
        if let Some(keys) = &self.config.split_keys {
            self.queue.register_queues(keys)?;
        }
        let handled = match &self.config.split_keys {
            Some(keys) => keys.join(", "),
            None => "(all of them)".to_string(),
        };
        info!(consumer = %self.config.name, "initiated outbox consumer");
        info!(consumer = %self.config.name, split_keys = %handled, "handling split keys");
        Ok(())
    }

    /// Run one relay cycle.
    ///
    /// Returns whether any row was relayed. Lock timeouts and deadlocks are reported
    /// to metrics and yield `Ok(false)`; other storage failures are returned.
    pub fn one_loop(&self) -> Result<bool, OutboxError> {
        match self.relay_batch() {
            Ok(relayed) => Ok(relayed),
            Err(OutboxError::Deadlock) => {
                warn!(consumer = %self.config.name, "outbox fetch deadlocked");
                self.metrics.write_point_queue(QueueStatus::Deadlocked, 0, 0);
                Ok(false)
            }
            Err(OutboxError::LockTimeout) => {
                warn!(consumer = %self.config.name, "outbox fetch lock timeout");
                self.metrics.write_point_queue(QueueStatus::LockTimeout, 0, 0);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Cycle until a shutdown signal arrives (or its sender is dropped).
    ///
    /// Sleeps `sleep_when_idle` after a cycle that relayed nothing; the sleep ends
    /// early on shutdown.
    pub fn run(&self, shutdown: &mpsc::Receiver<()>) {
        info!(consumer = %self.config.name, "outbox consumer started");

        loop {
            match shutdown.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            let relayed = match self.one_loop() {
                Ok(relayed) => relayed,
                Err(err) => {
                    error!(consumer = %self.config.name, error = %err, "outbox cycle failed");
                    false
                }
            };

            if !relayed {
                match shutdown.recv_timeout(self.config.sleep_when_idle) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                }
            }
        }

        info!(consumer = %self.config.name, "outbox consumer stopped");
    }

    /// Run the consumer on a named background thread.
    pub fn spawn(self) -> std::io::Result<ConsumerHandle>
    where
        S: 'static,
        Q: 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(&shutdown_rx))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    fn relay_batch(&self) -> Result<bool, OutboxError> {
        let mut batch = self.store.lock_batch(&self.config.filter())?;

        if batch.records().is_empty() {
            self.metrics.write_point_queue(QueueStatus::Ok, 0, 0);
            return Ok(false);
        }

        let now = self.clock.now();
        let relay = self.relay(batch.records(), now);

        batch.mark_enqueued(&relay.enqueued, now)?;
        batch.commit()?;

        self.metrics
            .write_point_queue(QueueStatus::Ok, relay.enqueued.len(), relay.failed.len());
        info!(
            consumer = %self.config.name,
            enqueued = relay.enqueued.len(),
            failed = relay.failed.len(),
            "sent {} messages from outbox table",
            relay.enqueued.len()
        );

        Ok(!relay.enqueued.is_empty())
    }

    /// Push the batch's payloads, one push per target queue.
    fn relay(&self, records: &[OutboxRecord], now: DateTime<Utc>) -> Relay {
        let enqueued_at = now.timestamp_micros() as f64 / 1_000_000.0;
        let mut relay = Relay::default();
        let mut groups: BTreeMap<String, (Vec<i64>, Vec<String>)> = BTreeMap::new();

        for record in records {
            let message = match decode_payload(record, enqueued_at) {
                Ok(message) => message,
                Err(err) => {
                    error!(outbox_id = record.id, error = %err, "skipping malformed outbox payload");
                    relay.failed.push(record.id);
                    continue;
                }
            };

            let Some(queue) = message.get(QUEUE_KEY).and_then(JsonValue::as_str) else {
                error!(outbox_id = record.id, "outbox payload names no target queue");
                relay.failed.push(record.id);
                continue;
            };
            let queue = queue.to_string();

            let encoded = JsonValue::Object(message).to_string();
            let group = groups.entry(queue).or_default();
            group.0.push(record.id);
            group.1.push(encoded);
        }

        for (queue, (ids, payloads)) in groups {
            match self.queue.push(&format!("queue:{queue}"), &payloads) {
                Ok(()) => {
                    debug!(queue = %queue, count = payloads.len(), "pushed outbox messages");
                    relay.enqueued.extend(ids);
                }
                Err(err) => {
                    error!(queue = %queue, error = %err, "failed to push outbox messages");
                    relay.failed.extend(ids);
                }
            }
        }

        relay
    }
}

/// Parse a sidekiq payload and stamp the relay time.
fn decode_payload(
    record: &OutboxRecord,
    enqueued_at: f64,
) -> Result<Map<String, JsonValue>, OutboxError> {
    let value: JsonValue =
        serde_json::from_str(&record.payload).map_err(|e| OutboxError::Decode {
            id: record.id,
            reason: e.to_string(),
        })?;

    let JsonValue::Object(mut message) = value else {
        return Err(OutboxError::Decode {
            id: record.id,
            reason: "payload is not a JSON object".to_string(),
        });
    };

    message.insert(ENQUEUED_AT_KEY.to_string(), JsonValue::from(enqueued_at));
    Ok(message)
}
