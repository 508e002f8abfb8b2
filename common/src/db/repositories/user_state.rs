// User state repository implementation
// Per-feed last-check timestamps and running counters

use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{from_millis, to_millis, FeedCheckpoint, FeedType, UserState};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

/// Repository for per-user polling state
#[derive(Clone)]
pub struct UserStateRepository {
    pool: DbPool,
}

/// Column pair backing a feed's checkpoint
fn columns(feed: FeedType) -> Option<(&'static str, &'static str)> {
    match feed {
        FeedType::Papers => Some(("last_papers_check", "papers_count")),
        FeedType::Patents => Some(("last_patents_check", "patents_count")),
        FeedType::Grants => Some(("last_grants_check", "grants_count")),
        FeedType::Email => Some(("last_email_check", "email_count")),
        FeedType::Test => None,
    }
}

impl UserStateRepository {
    /// Create a new UserStateRepository
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load the polling state for a user, `None` if no row exists
    #[instrument(skip(self))]
    pub async fn find(&self, user_id: &str) -> Result<Option<UserState>, DatabaseError> {
        let row = sqlx::query(
            r#"
            SELECT user_id,
                   last_papers_check, papers_count,
                   last_patents_check, patents_count,
                   last_grants_check, grants_count,
                   last_email_check, email_count
            FROM user_state
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(|row| state_from_row(&row)).transpose()
    }

    /// Record a completed check: stamp the time and add to the running count
    #[instrument(skip(self))]
    pub async fn record_check(
        &self,
        user_id: &str,
        feed: FeedType,
        at: DateTime<Utc>,
        added: i64,
    ) -> Result<(), DatabaseError> {
        let Some((last_col, count_col)) = columns(feed) else {
            return Ok(());
        };

        sqlx::query("INSERT OR IGNORE INTO user_state (user_id) VALUES (?1)")
            .bind(user_id)
            .execute(self.pool.pool())
            .await?;

        let sql = format!(
            "UPDATE user_state SET {last} = ?2, {count} = {count} + ?3 WHERE user_id = ?1",
            last = last_col,
            count = count_col
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(to_millis(at))
            .bind(added)
            .execute(self.pool.pool())
            .await?;

        tracing::debug!(user_id = %user_id, feed = %feed, added, "Recorded feed check");
        Ok(())
    }
}

fn checkpoint(row: &SqliteRow, last_col: &str, count_col: &str) -> Result<FeedCheckpoint, sqlx::Error> {
    let last: Option<i64> = row.try_get(last_col)?;
    Ok(FeedCheckpoint {
        last_check: last.map(from_millis),
        count: row.try_get(count_col)?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<UserState, DatabaseError> {
    Ok(UserState {
        user_id: row.try_get("user_id")?,
        papers: checkpoint(row, "last_papers_check", "papers_count")?,
        patents: checkpoint(row, "last_patents_check", "patents_count")?,
        grants: checkpoint(row, "last_grants_check", "grants_count")?,
        email: checkpoint(row, "last_email_check", "email_count")?,
    })
}
