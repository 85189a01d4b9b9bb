//! The Metadata Store (§4.1): durable, transactional storage for the
//! logical/physical bucket and object graph, built directly on
//! `sqlx::PgPool` the way the teacher's `pg_database.rs` does — raw SQL via
//! `sqlx::query(...)`/`query_as(...)`, explicit `pool.begin()` transactions,
//! no compile-time-checked `query!` macro (this crate is never built
//! against a live `DATABASE_URL`).

pub mod buckets;
pub mod multipart;
pub mod objects;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;

pub async fn connect(config: &DatabaseConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(16).connect(&config.connection_string()).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Shared harness for the `#[ignore]`d, Postgres-backed tests in the
/// `db::*` submodules: every test connects to the same scratch database
/// named by `DATABASE_URL` and migrates it, then picks unique bucket/key
/// names so tests can run concurrently without clobbering each other.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicU64, Ordering};

    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;

    pub async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch postgres for db tests");
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await.expect("connect to scratch postgres");
        sqlx::migrate!("./migrations").run(&pool).await.expect("run migrations");
        pool
    }

    /// A process-unique suffix so concurrent test runs don't collide on
    /// `(bucket, key)`/`bucket_name` uniqueness constraints.
    pub fn unique_suffix() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}
