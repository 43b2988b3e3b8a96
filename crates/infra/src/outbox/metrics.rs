use tracing::info;

/// Outcome of one consumer cycle, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Ok,
    Deadlocked,
    LockTimeout,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Ok => "ok",
            QueueStatus::Deadlocked => "deadlocked",
            QueueStatus::LockTimeout => "lock_timeout",
        }
    }
}

impl core::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for per-cycle outbox measurements.
pub trait OutboxMetrics: Send + Sync {
    fn write_point_queue(&self, status: QueueStatus, enqueued: usize, failed: usize);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl OutboxMetrics for NullMetrics {
    fn write_point_queue(&self, _status: QueueStatus, _enqueued: usize, _failed: usize) {}
}

/// Writes each measurement as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

impl OutboxMetrics for LogMetrics {
    fn write_point_queue(&self, status: QueueStatus, enqueued: usize, failed: usize) {
        info!(
            target: "eventline::outbox::metrics",
            status = status.as_str(),
            enqueued,
            failed,
            "queue"
        );
    }
}
