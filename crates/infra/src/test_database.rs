//! Live Postgres for the adapter tests.
//!
//! Those tests are `#[ignore]`d; run them with `cargo test -- --ignored` and
//! `EVENTLINE_DATABASE_URL` pointing at a disposable database. Without the variable
//! they return early.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::runtime::{Builder, Handle, Runtime};

pub(crate) const DATABASE_URL_VAR: &str = "EVENTLINE_DATABASE_URL";

pub(crate) struct TestDatabase {
    runtime: Runtime,
    pool: PgPool,
}

impl TestDatabase {
    /// Connect to `EVENTLINE_DATABASE_URL`, or `None` when it is unset.
    pub(crate) fn connect() -> Option<Self> {
        let Ok(url) = std::env::var(DATABASE_URL_VAR) else {
            eprintln!("{DATABASE_URL_VAR} not set; skipping");
            return None;
        };
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("test runtime");
        let pool = runtime
            .block_on(PgPoolOptions::new().max_connections(8).connect(&url))
            .expect("connect to test database");
        Some(Self { runtime, pool })
    }

    pub(crate) fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub(crate) fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Run one or more statements, panicking on failure.
    pub(crate) fn execute(&self, sql: &str) {
        self.runtime
            .block_on(sqlx::raw_sql(sql).execute(&self.pool))
            .expect("test statement");
    }

    pub(crate) fn scalar(&self, sql: &str) -> i64 {
        self.runtime
            .block_on(sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool))
            .expect("test query")
    }

    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}
