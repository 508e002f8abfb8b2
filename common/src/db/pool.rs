// SQLite connection pool implementation
// WAL journal, busy timeout and embedded migrations

use crate::config::DatabaseConfig;
use crate::errors::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper
/// Provides a managed connection pool to SQLite with health checking
#[derive(Debug, Clone)]
pub struct DbPool {
    pool: SqlitePool,
}

impl DbPool {
    /// Open (creating if needed) the database and apply pending migrations
    ///
    /// # Errors
    /// Returns `DatabaseError::ConnectionFailed` if unable to open the database
    /// and `DatabaseError::MigrationFailed` if the schema cannot be applied
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        info!("Initializing database connection pool");

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_seconds))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create database pool");
                DatabaseError::ConnectionFailed(e.to_string())
            })?;

        let db = Self { pool };
        db.migrate().await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool initialized successfully"
        );

        Ok(db)
    }

    /// Apply embedded migrations
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to apply migrations");
                DatabaseError::from(e)
            })
    }

    /// Get a reference to the underlying pool
    ///
    /// This is used by repositories to execute queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Perform a health check on the database connection
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Database health check failed");
                DatabaseError::HealthCheckFailed(e.to_string())
            })?;

        tracing::debug!("Database health check passed");
        Ok(())
    }

    /// Close the connection pool gracefully
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("pool.db").display()),
            max_connections: 2,
            min_connections: 1,
            connect_timeout_seconds: 5,
            busy_timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_pool_creation_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new(&config_for(&dir)).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'notifications', 'user_state') ORDER BY name",
        )
        .fetch_all(pool.pool())
        .await
        .unwrap();

        assert_eq!(tables, vec!["notifications", "user_state", "users"]);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new(&config_for(&dir)).await.unwrap();
        assert!(pool.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = DbPool::new(&config_for(&dir)).await.unwrap();
        first.close().await;
        assert!(DbPool::new(&config_for(&dir)).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_fails_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::new(&config_for(&dir)).await.unwrap();
        pool.close().await;
        assert!(pool.health_check().await.is_err());
    }
}
