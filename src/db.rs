use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .context("DATABASE_URL is not configured")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    info!(max_connections = config.max_connections, "PostgreSQL pool ready");
    Ok(pool)
}

/// Create the tables this service owns if they do not exist yet.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bank_entities (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            country TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create bank_entities table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            key_value TEXT PRIMARY KEY,
            claimed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create idempotency_keys table")?;

    info!("Database schema initialized");
    Ok(())
}
