//! # Database Persistence Layer
//!
//! Postgres persistence for middleman sessions via SQLx.
//!
//! The database is **optional**. When `DATABASE_URL` is set, sessions are
//! stored in the `middleman_requests` table and acceptance timers are
//! rehydrated from it on startup. When absent, the service runs on the
//! in-memory store: suitable for development and tests, but sessions do not
//! survive a restart.

pub mod middleman_requests;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            tracing::warn!(
                "DATABASE_URL not set: running in-memory only mode. \
                 Sessions and their acceptance timers will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}
