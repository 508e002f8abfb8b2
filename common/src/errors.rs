// Error handling framework

use thiserror::Error;

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Malformed config for user {user_id}: {reason}")]
    MalformedConfig { user_id: String, reason: String },
}

/// Errors raised by source adapters while checking a feed
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Feed request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid feed response: {0}")]
    InvalidResponse(String),

    #[error("Feed check timed out after {0} seconds")]
    Timeout(u64),

    #[error("No adapter configured for feed: {0}")]
    NotConfigured(String),
}

/// Errors raised while applying a partial config update
#[derive(Error, Debug)]
pub enum ConfigUpdateError {
    #[error("Config patch must be a JSON object")]
    InvalidPatch,

    #[error("Merged config is invalid: {0}")]
    Invalid(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DatabaseError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => DatabaseError::QueryFailed(db_err.message().to_string()),
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(err.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AdapterError::InvalidResponse(err.to_string())
        } else {
            AdapterError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ConfigUpdateError {
    fn from(err: serde_json::Error) -> Self {
        ConfigUpdateError::Invalid(err.to_string())
    }
}
