use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use eventline_infra::outbox::{Consumer, LogMetrics, PostgresOutboxStore, RedisQueue};
use eventline_outbox::config::OutboxSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eventline_observability::init();

    let settings = OutboxSettings::from_env().context("invalid outbox configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresOutboxStore::new(pool)?.with_lock_timeout(settings.lock_timeout);
    let queue = RedisQueue::new(&settings.redis_url)?;

    let consumer = Consumer::new(settings.consumer_config(), store, queue)?
        .with_metrics(Arc::new(LogMetrics));
    consumer.init().context("failed to register split keys")?;

    let handle = consumer.spawn().context("failed to spawn outbox consumer")?;
    tracing::info!("outbox relay running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("gracefully shutting down");

    // Joining waits for the in-flight cycle, which itself blocks on this runtime.
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .context("outbox consumer panicked")?;

    Ok(())
}
