// Notification repository implementation
// Enqueue, atomic pending fetch, listing, deletes and retention

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{from_millis, to_millis, FeedType, NewNotification, Notification};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

/// Per-type counters as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCount {
    pub notification_type: String,
    pub total: i64,
    pub delivered: i64,
}

/// Repository for notification-related database operations
#[derive(Clone)]
pub struct NotificationRepository {
    pool: DbPool,
}

impl NotificationRepository {
    /// Create a new NotificationRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a notification and return its id.
    ///
    /// Returns `None` when a row with the same user, type and fingerprint
    /// already exists.
    #[instrument(skip(self, notification), fields(user_id = %notification.user_id, notification_type = %notification.notification_type))]
    pub async fn insert(&self, notification: &NewNotification) -> Result<Option<i64>, DatabaseError> {
        let data = serde_json::to_string(&notification.data)
            .map_err(|e| DatabaseError::QueryFailed(format!("Failed to serialize data: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO notifications (
                user_id, notification_type, title, message, data,
                fingerprint, created_at, delivered
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
            "#,
        )
        .bind(&notification.user_id)
        .bind(notification.notification_type.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(data)
        .bind(&notification.fingerprint)
        .bind(to_millis(notification.created_at))
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Mark up to `limit` of the newest undelivered notifications delivered
    /// and return them, newest first.
    ///
    /// The select and the update are one statement, so concurrent callers for
    /// the same user can never receive the same row.
    #[instrument(skip(self))]
    pub async fn take_pending(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let rows = sqlx::query(
            r#"
            UPDATE notifications
            SET delivered = 1
            WHERE id IN (
                SELECT id
                FROM notifications
                WHERE user_id = ?1 AND delivered = 0
                ORDER BY created_at DESC, id DESC
                LIMIT ?2
            )
            RETURNING id, user_id, notification_type, title, message, data, created_at, delivered
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let mut notifications = rows
            .iter()
            .map(notification_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        sort_newest_first(&mut notifications);

        Ok(notifications)
    }

    /// List notifications without changing their delivered state
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        user_id: &str,
        limit: u32,
        include_delivered: bool,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, notification_type, title, message, data, created_at, delivered
            FROM notifications
            WHERE user_id = ?1 AND (?2 OR delivered = 0)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(user_id)
        .bind(include_delivered)
        .bind(i64::from(limit))
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    /// Delete one notification owned by `user_id`
    #[instrument(skip(self))]
    pub async fn delete_by_id(&self, user_id: &str, id: i64) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every notification of one type owned by `user_id`
    #[instrument(skip(self))]
    pub async fn delete_by_type(
        &self,
        user_id: &str,
        notification_type: FeedType,
    ) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM notifications WHERE user_id = ?1 AND notification_type = ?2",
        )
        .bind(user_id)
        .bind(notification_type.as_str())
        .execute(self.pool.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete every notification owned by `user_id`
    #[instrument(skip(self))]
    pub async fn delete_all(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Total and delivered counts grouped by type
    #[instrument(skip(self))]
    pub async fn count_by_type(&self, user_id: &str) -> Result<Vec<TypeCount>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT notification_type,
                   COUNT(*) AS total,
                   COALESCE(SUM(delivered), 0) AS delivered
            FROM notifications
            WHERE user_id = ?1
            GROUP BY notification_type
            ORDER BY notification_type
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            counts.push(TypeCount {
                notification_type: row.try_get("notification_type")?,
                total: row.try_get("total")?,
                delivered: row.try_get("delivered")?,
            });
        }

        Ok(counts)
    }

    /// Whether a notification with this content fingerprint was already stored
    #[instrument(skip(self))]
    pub async fn fingerprint_exists(
        &self,
        user_id: &str,
        notification_type: FeedType,
        fingerprint: &str,
    ) -> Result<bool, DatabaseError> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notifications
                WHERE user_id = ?1 AND notification_type = ?2 AND fingerprint = ?3
            )
            "#,
        )
        .bind(user_id)
        .bind(notification_type.as_str())
        .bind(fingerprint)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(exists != 0)
    }

    /// Delete delivered notifications created before `cutoff`.
    /// Undelivered rows are never touched.
    #[instrument(skip(self))]
    pub async fn delete_delivered_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let result =
            sqlx::query("DELETE FROM notifications WHERE delivered = 1 AND created_at < ?1")
                .bind(to_millis(cutoff))
                .execute(self.pool.pool())
                .await?;

        Ok(result.rows_affected())
    }
}

fn sort_newest_first(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, DatabaseError> {
    let raw_type: String = row.try_get("notification_type")?;
    let notification_type = raw_type
        .parse::<FeedType>()
        .map_err(DatabaseError::QueryFailed)?;
    let raw_data: String = row.try_get("data")?;
    let data = serde_json::from_str(&raw_data).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Stored notification data is not valid JSON");
        serde_json::json!({})
    });

    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        notification_type,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        data,
        created_at: from_millis(row.try_get("created_at")?),
        delivered: row.try_get("delivered")?,
    })
}
