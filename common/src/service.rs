// Notification service
// The single object a request layer talks to. Built once at start-up and
// shared behind an Arc.

use crate::adapters::AdapterRegistry;
use crate::config::Settings;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{
    DeleteOutcome, DeleteSelector, DeviceInfo, FeedType, Notification, NotificationSummary,
    Registration, UserStats,
};
use crate::monitor::{
    MonitorConfig, MonitorEngine, MonitorHandle, MonitorStatus, StartOutcome, StopOutcome,
    TickReport,
};
use crate::notification_store::NotificationStore;
use crate::registry::UserRegistry;
use crate::subscription::SubscriptionConfig;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct NotificationService {
    pool: DbPool,
    registry: UserRegistry,
    store: NotificationStore,
    monitor: MonitorHandle,
    active_window: chrono::Duration,
    list_default_limit: u32,
}

impl NotificationService {
    pub fn new(settings: &Settings, pool: DbPool, adapters: AdapterRegistry) -> Self {
        let registry = UserRegistry::new(pool.clone(), settings.identity.salt.clone());
        let store = NotificationStore::with_fetch_limit(
            pool.clone(),
            settings.notifications.pending_fetch_limit,
        );
        let monitor_config = MonitorConfig::from(&settings.monitor);
        let active_window = monitor_config.active_window();

        let engine = Arc::new(MonitorEngine::new(
            monitor_config,
            registry.clone(),
            store.clone(),
            adapters,
        ));

        Self {
            pool,
            registry,
            store,
            monitor: MonitorHandle::new(engine),
            active_window,
            list_default_limit: settings.notifications.list_default_limit.max(1),
        }
    }

    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn register(
        &self,
        ip_address: &str,
        user_agent: &str,
        device: DeviceInfo,
    ) -> Result<Registration, DatabaseError> {
        self.registry.register(ip_address, user_agent, device).await
    }

    pub async fn get_config(&self, user_id: &str) -> SubscriptionConfig {
        self.registry.get_config(user_id).await
    }

    pub async fn update_config(&self, user_id: &str, patch: &serde_json::Value) -> bool {
        self.registry.update_config(user_id, patch).await
    }

    /// Users seen within `window`, or within the monitor's active window
    pub async fn get_active_users(&self, window: Option<chrono::Duration>) -> Vec<String> {
        self.registry
            .list_active(window.unwrap_or(self.active_window))
            .await
    }

    /// Profile, polling state and notification counts; `None` for unknown users
    #[instrument(skip(self))]
    pub async fn get_user_stats(&self, user_id: &str) -> Option<UserStats> {
        let user = self.registry.find_user(user_id).await?;
        let state = self.registry.user_state(user_id).await;
        let summary = self.store.summarize(user_id).await;

        Some(UserStats {
            user_id: user.user_id,
            device_name: user.device_name,
            config: user.config,
            state,
            total_notifications: summary.total,
            notification_counts: summary
                .by_type
                .into_iter()
                .map(|(feed, counts)| (feed, counts.total))
                .collect(),
        })
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Pending notifications, marked delivered on the way out.
    /// Polling counts as contact, so the caller stays active.
    pub async fn get_pending_notifications(&self, user_id: &str) -> Vec<Notification> {
        self.registry.touch(user_id).await;
        self.store.fetch_pending(user_id).await
    }

    /// Read-only listing; `limit` falls back to the configured default
    pub async fn get_all_notifications(
        &self,
        user_id: &str,
        limit: Option<u32>,
        include_delivered: bool,
    ) -> Vec<Notification> {
        let limit = limit.unwrap_or(self.list_default_limit);
        self.store.list_all(user_id, limit, include_delivered).await
    }

    pub async fn add_notification(
        &self,
        user_id: &str,
        notification_type: FeedType,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Option<i64> {
        self.store
            .enqueue(user_id, notification_type, title, message, data)
            .await
    }

    /// Queue a `test` notification so a client can verify its delivery path
    pub async fn send_test_notification(&self, user_id: &str) -> Option<i64> {
        let now = Utc::now();
        self.store
            .enqueue(
                user_id,
                FeedType::Test,
                "Test notification",
                &format!(
                    "Notifications are working. Sent at {}",
                    now.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                json!({ "test": true, "sent_at": now.to_rfc3339() }),
            )
            .await
    }

    pub async fn delete_notification(&self, user_id: &str, notification_id: i64) -> DeleteOutcome {
        self.store
            .delete(user_id, DeleteSelector::Id(notification_id))
            .await
    }

    /// Delete every notification of `notification_type`, or all of them
    pub async fn delete_all_notifications(
        &self,
        user_id: &str,
        notification_type: Option<FeedType>,
    ) -> DeleteOutcome {
        let selector = notification_type.map_or(DeleteSelector::All, DeleteSelector::Type);
        self.store.delete(user_id, selector).await
    }

    pub async fn get_notification_summary(&self, user_id: &str) -> NotificationSummary {
        self.store.summarize(user_id).await
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    pub async fn start_background_monitoring(&self) -> StartOutcome {
        self.monitor.start().await
    }

    pub async fn stop_background_monitoring(&self) -> StopOutcome {
        self.monitor.stop().await
    }

    pub async fn monitoring_status(&self) -> MonitorStatus {
        self.monitor.status().await
    }

    /// Run one monitor pass in the caller's task
    pub async fn run_tick(&self) -> TickReport {
        self.monitor.engine().tick().await
    }

    /// Stop monitoring and close the pool
    pub async fn shutdown(&self) -> StopOutcome {
        let outcome = self.monitor.stop().await;
        self.pool.close().await;
        info!(?outcome, "Notification service shut down");
        outcome
    }
}
