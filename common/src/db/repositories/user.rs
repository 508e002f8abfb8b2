// User repository implementation
// Tenant rows keyed by fingerprint id, with the subscription config as JSON text

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{from_millis, to_millis, User};
use crate::subscription::SubscriptionConfig;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

/// Repository for user-related database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a user together with its empty polling state.
    ///
    /// Returns `false` when the user already existed; the stored row is left
    /// untouched in that case.
    #[instrument(skip(self, user), fields(user_id = %user.user_id))]
    pub async fn insert_if_absent(&self, user: &User) -> Result<bool, DatabaseError> {
        let config = user
            .config
            .to_stored()
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to serialize config: {}", e)))?;

        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO users (
                user_id, session_id, device_id, device_name, config,
                created_at, last_active
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.session_id)
        .bind(&user.device_id)
        .bind(&user.device_name)
        .bind(config)
        .bind(to_millis(user.created_at))
        .bind(to_millis(user.last_active))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO user_state (user_id) VALUES (?1)")
            .bind(&user.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            tracing::info!(user_id = %user.user_id, "User created");
        }
        Ok(inserted)
    }

    /// Find a user by id.
    ///
    /// A stored config that cannot be parsed surfaces as
    /// `DatabaseError::MalformedConfig` so callers can decide how to heal it.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, session_id, device_id, device_name, config, created_at, last_active
            FROM users
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(|row| user_from_row(&row)).transpose()
    }

    /// Refresh session and device details on a repeat contact
    #[instrument(skip(self))]
    pub async fn refresh_contact(
        &self,
        user_id: &str,
        session_id: &str,
        device_id: &str,
        device_name: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET session_id = ?2,
                device_id = ?3,
                device_name = ?4,
                last_active = ?5
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .bind(device_id)
        .bind(device_name)
        .bind(to_millis(at))
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist a config document and mark the user active
    #[instrument(skip(self, config))]
    pub async fn save_config(
        &self,
        user_id: &str,
        config: &SubscriptionConfig,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let stored = config
            .to_stored()
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to serialize config: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET config = ?2,
                last_active = ?3
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .bind(stored)
        .bind(to_millis(at))
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() > 0 {
            tracing::debug!(user_id = %user_id, "User config saved");
        }
        Ok(result.rows_affected() > 0)
    }

    /// Persist a config document without touching `last_active`
    #[instrument(skip(self, config))]
    pub async fn replace_config(
        &self,
        user_id: &str,
        config: &SubscriptionConfig,
    ) -> Result<bool, DatabaseError> {
        let stored = config
            .to_stored()
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to serialize config: {}", e)))?;

        let result = sqlx::query("UPDATE users SET config = ?2 WHERE user_id = ?1")
            .bind(user_id)
            .bind(stored)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite `last_active` for a user
    #[instrument(skip(self))]
    pub async fn set_last_active(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET last_active = ?2 WHERE user_id = ?1")
            .bind(user_id)
            .bind(to_millis(at))
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Ids of users whose last contact is at or after `cutoff`
    #[instrument(skip(self))]
    pub async fn find_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_id
            FROM users
            WHERE last_active >= ?1
            ORDER BY last_active DESC
            "#,
        )
        .bind(to_millis(cutoff))
        .fetch_all(self.pool.pool())
        .await?;

        tracing::debug!(count = ids.len(), "Found active users");
        Ok(ids)
    }
}

fn user_from_row(row: &SqliteRow) -> Result<User, DatabaseError> {
    let user_id: String = row.try_get("user_id")?;
    let raw_config: String = row.try_get("config")?;
    let config =
        SubscriptionConfig::from_stored(&raw_config).map_err(|e| DatabaseError::MalformedConfig {
            user_id: user_id.clone(),
            reason: e.to_string(),
        })?;

    Ok(User {
        session_id: row.try_get("session_id")?,
        device_id: row.try_get("device_id")?,
        device_name: row.try_get("device_name")?,
        config,
        created_at: from_millis(row.try_get("created_at")?),
        last_active: from_millis(row.try_get("last_active")?),
        user_id,
    })
}
