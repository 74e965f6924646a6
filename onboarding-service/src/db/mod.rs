//! PostgreSQL pool and schema migrations for the credential store.

use crate::config::DatabaseConfig;
use anyhow::Context;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Opens the pool described by `config`. Fails when no URL is configured.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, anyhow::Error> {
    let url = config
        .url
        .as_deref()
        .context("DATABASE_URL is not configured")?;

    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Applies `migrations/` in order; already-applied files are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}
