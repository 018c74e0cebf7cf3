//! Connection pool setup

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::IngestResult;

/// Create the pool shared by the ledger and the loader.
///
/// The ledger pins one connection per live import while the loader runs its
/// transaction on another, so the pool needs at least two connections.
pub async fn create_pool(config: &DatabaseConfig) -> IngestResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections.max(2))
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections.max(2),
        "Database connection pool created"
    );

    Ok(pool)
}

/// Check that the pool can reach the server
pub async fn health_check(pool: &PgPool) -> IngestResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
