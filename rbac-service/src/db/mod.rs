//! PostgreSQL pool and schema management.

use crate::config::DatabaseConfig;
use crate::services::PgStore;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Open a pool sized and timed by `config`.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening PostgreSQL pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("PostgreSQL pool ready");
    Ok(pool)
}

/// Apply the schema under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Open the pool, bring the schema up to date and wrap it as the core's store.
pub async fn connect_store(config: &DatabaseConfig) -> Result<PgStore, AppError> {
    let pool = create_pool(config)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;
    run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
    Ok(PgStore::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::AuthzStore;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/rbac_test".to_string()),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
        }
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_connect_store_migrates_and_answers_health_check() {
        let store = connect_store(&test_config()).await.unwrap();
        assert!(store.health_check().await.is_ok());

        // Migrations are idempotent.
        run_migrations(store.pool()).await.unwrap();
    }
}
