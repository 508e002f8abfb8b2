// Notification store
// Enqueue, pending fetch, listing, deletes, summaries and retention.
//
// Public operations never return errors: storage failures are logged and the
// caller sees an empty or zero result, so a storage hiccup cannot abort a
// monitor cycle or a request.

use crate::db::repositories::NotificationRepository;
use crate::db::DbPool;
use crate::models::{
    DeleteOutcome, DeleteSelector, FeedType, NewNotification, Notification, NotificationSummary,
    TypeSummary,
};
use crate::telemetry;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_PENDING_FETCH_LIMIT: u32 = 20;

/// Service over the notification table
#[derive(Clone)]
pub struct NotificationStore {
    repo: NotificationRepository,
    pending_fetch_limit: u32,
}

impl NotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_fetch_limit(pool, DEFAULT_PENDING_FETCH_LIMIT)
    }

    pub fn with_fetch_limit(pool: DbPool, pending_fetch_limit: u32) -> Self {
        Self {
            repo: NotificationRepository::new(pool),
            pending_fetch_limit: pending_fetch_limit.max(1),
        }
    }

    /// Store a notification. Returns the new id, or `None` if the write failed.
    #[instrument(skip(self, title, message, data))]
    pub async fn enqueue(
        &self,
        user_id: &str,
        notification_type: FeedType,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Option<i64> {
        self.enqueue_with_fingerprint(user_id, notification_type, title, message, data, None)
            .await
    }

    /// Store a notification tagged with a content fingerprint for dedup
    pub async fn enqueue_with_fingerprint(
        &self,
        user_id: &str,
        notification_type: FeedType,
        title: &str,
        message: &str,
        data: serde_json::Value,
        fingerprint: Option<String>,
    ) -> Option<i64> {
        let notification = NewNotification {
            user_id: user_id.to_string(),
            notification_type,
            title: title.to_string(),
            message: message.to_string(),
            data,
            fingerprint,
            created_at: Utc::now(),
        };
        self.insert(&notification).await
    }

    /// Insert a fully specified notification, logging instead of failing.
    /// Returns `None` on a write failure or a fingerprint already stored.
    pub async fn insert(&self, notification: &NewNotification) -> Option<i64> {
        match self.repo.insert(notification).await {
            Ok(Some(id)) => {
                info!(
                    user_id = %notification.user_id,
                    notification_type = %notification.notification_type,
                    notification_id = id,
                    "Notification enqueued"
                );
                telemetry::record_notification_enqueued(notification.notification_type);
                Some(id)
            }
            Ok(None) => {
                debug!(
                    user_id = %notification.user_id,
                    notification_type = %notification.notification_type,
                    "Notification with the same fingerprint already stored"
                );
                None
            }
            Err(e) => {
                error!(
                    user_id = %notification.user_id,
                    notification_type = %notification.notification_type,
                    error = %e,
                    "Failed to enqueue notification"
                );
                None
            }
        }
    }

    /// Hand over undelivered notifications and mark them delivered in the
    /// same statement, newest first.
    #[instrument(skip(self))]
    pub async fn fetch_pending(&self, user_id: &str) -> Vec<Notification> {
        match self.repo.take_pending(user_id, self.pending_fetch_limit).await {
            Ok(notifications) => {
                if !notifications.is_empty() {
                    info!(user_id = %user_id, count = notifications.len(), "Notifications delivered");
                    telemetry::record_notifications_delivered(notifications.len());
                }
                notifications
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to fetch pending notifications");
                Vec::new()
            }
        }
    }

    /// Read-only listing, newest first
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        user_id: &str,
        limit: u32,
        include_delivered: bool,
    ) -> Vec<Notification> {
        match self.repo.list(user_id, limit, include_delivered).await {
            Ok(notifications) => notifications,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to list notifications");
                Vec::new()
            }
        }
    }

    /// Delete notifications owned by `user_id`
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, selector: DeleteSelector) -> DeleteOutcome {
        let result = match selector {
            DeleteSelector::Id(id) => self.repo.delete_by_id(user_id, id).await,
            DeleteSelector::Type(notification_type) => {
                self.repo.delete_by_type(user_id, notification_type).await
            }
            DeleteSelector::All => self.repo.delete_all(user_id).await,
        };

        match result {
            Ok(removed) => {
                let not_found = matches!(selector, DeleteSelector::Id(_)) && removed == 0;
                if not_found {
                    debug!(user_id = %user_id, ?selector, "Notification not found");
                } else {
                    info!(user_id = %user_id, ?selector, removed, "Notifications deleted");
                }
                DeleteOutcome { removed, not_found }
            }
            Err(e) => {
                error!(user_id = %user_id, ?selector, error = %e, "Failed to delete notifications");
                DeleteOutcome {
                    removed: 0,
                    not_found: false,
                }
            }
        }
    }

    /// Totals per type, split into pending and delivered
    #[instrument(skip(self))]
    pub async fn summarize(&self, user_id: &str) -> NotificationSummary {
        let counts = match self.repo.count_by_type(user_id).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Failed to summarize notifications");
                return NotificationSummary::default();
            }
        };

        let mut summary = NotificationSummary::default();
        for count in counts {
            let Ok(feed) = count.notification_type.parse::<FeedType>() else {
                warn!(notification_type = %count.notification_type, "Skipping unknown notification type");
                continue;
            };
            let entry = summary.by_type.entry(feed).or_insert_with(TypeSummary::default);
            entry.total += count.total;
            entry.delivered += count.delivered;
            entry.pending += count.total - count.delivered;
            summary.total += count.total;
        }

        summary
    }

    /// Delete delivered notifications older than `days`. Pending ones are kept
    /// regardless of age. Returns the number removed, 0 on failure.
    #[instrument(skip(self))]
    pub async fn retention_sweep(&self, days: u32) -> u64 {
        let Some(cutoff) = Utc::now().checked_sub_signed(chrono::Duration::days(i64::from(days)))
        else {
            debug!(days, "Retention window reaches past the calendar range, nothing to sweep");
            return 0;
        };
        match self.repo.delete_delivered_before(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, days, "Retention sweep removed delivered notifications");
                    telemetry::record_notifications_swept(removed);
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Retention sweep failed");
                0
            }
        }
    }

    /// Whether content with this fingerprint was already stored for the user.
    /// A failed lookup counts as unseen, preferring a duplicate over a loss.
    pub async fn seen(&self, user_id: &str, notification_type: FeedType, fingerprint: &str) -> bool {
        match self
            .repo
            .fingerprint_exists(user_id, notification_type, fingerprint)
            .await
        {
            Ok(exists) => exists,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Fingerprint lookup failed");
                false
            }
        }
    }
}
