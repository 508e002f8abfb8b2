// Monitor engine
// One pass ("tick") over active users: resolve due feeds, call adapters,
// dedup and enqueue results, then sweep old delivered notifications.

use crate::adapters::{AdapterRegistry, FeedItem, FeedQuery, SourceAdapter};
use crate::config::MonitorSettings;
use crate::errors::AdapterError;
use crate::models::{FeedCheckpoint, FeedType};
use crate::notification_store::NotificationStore;
use crate::registry::UserRegistry;
use crate::subscription::SubscriptionConfig;
use crate::telemetry;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// How far back the first check of a feed looks
const FIRST_CHECK_LOOKBACK_HOURS: i64 = 24;

/// Configuration for the monitor
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// How often the loop wakes (in seconds)
    pub poll_interval_seconds: u64,
    /// Trailing window defining an active user (in hours)
    pub active_window_hours: u64,
    /// Pause between tenants that were checked (in milliseconds)
    pub inter_user_pause_millis: u64,
    /// Upper bound on notifications per (user, feed) in one tick
    pub max_per_type_per_cycle: usize,
    /// Delivered notifications older than this are swept
    pub retention_days: u32,
    /// Per adapter call; 0 disables the timeout
    pub adapter_timeout_seconds: u64,
    /// How long `stop` waits for the loop to exit
    pub shutdown_timeout_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            active_window_hours: 24,
            inter_user_pause_millis: 1000,
            max_per_type_per_cycle: 5,
            retention_days: 7,
            adapter_timeout_seconds: 30,
            shutdown_timeout_seconds: 5,
        }
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            poll_interval_seconds: settings.poll_interval_seconds,
            active_window_hours: settings.active_window_hours,
            inter_user_pause_millis: settings.inter_user_pause_millis,
            max_per_type_per_cycle: settings.max_per_type_per_cycle,
            retention_days: settings.retention_days,
            adapter_timeout_seconds: settings.adapter_timeout_seconds,
            shutdown_timeout_seconds: settings.shutdown_timeout_seconds,
        }
    }
}

impl MonitorConfig {
    pub fn active_window(&self) -> chrono::Duration {
        let hours = i64::try_from(self.active_window_hours).unwrap_or(i64::MAX);
        chrono::Duration::hours(hours.min(i64::MAX / 3_600_000))
    }
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    Scanning,
    PerUserCheck,
    Sleeping,
}

impl MonitorPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => MonitorPhase::Scanning,
            2 => MonitorPhase::PerUserCheck,
            3 => MonitorPhase::Sleeping,
            _ => MonitorPhase::Idle,
        }
    }
}

/// Last observed outcome of a feed's adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedHealth {
    Healthy {
        last_success: DateTime<Utc>,
    },
    Degraded {
        error: String,
        since: DateTime<Utc>,
        consecutive_failures: u32,
    },
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub active_users: usize,
    pub users_checked: usize,
    pub checks_run: usize,
    pub checks_skipped: usize,
    pub notifications_enqueued: usize,
    pub failures: usize,
    pub swept: u64,
    /// Set when a shutdown request cut the pass short
    pub interrupted: bool,
}

/// Snapshot for the request layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub phase: MonitorPhase,
    pub last_tick: Option<TickReport>,
    pub feeds: BTreeMap<FeedType, FeedHealth>,
    pub adapters: Vec<FeedType>,
}

enum FeedOutcome {
    Skipped,
    Checked { enqueued: usize },
    Failed,
}

/// The tick logic; owned by the background worker and callable directly
pub struct MonitorEngine {
    config: MonitorConfig,
    registry: UserRegistry,
    store: NotificationStore,
    adapters: AdapterRegistry,
    phase: AtomicU8,
    health: Mutex<BTreeMap<FeedType, FeedHealth>>,
    last_tick: Mutex<Option<TickReport>>,
    /// Held for a whole pass so the loop and on-demand ticks never overlap
    tick_lock: Mutex<()>,
}

impl MonitorEngine {
    pub fn new(
        config: MonitorConfig,
        registry: UserRegistry,
        store: NotificationStore,
        adapters: AdapterRegistry,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            adapters,
            phase: AtomicU8::new(MonitorPhase::Idle as u8),
            health: Mutex::new(BTreeMap::new()),
            last_tick: Mutex::new(None),
            tick_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn phase(&self) -> MonitorPhase {
        MonitorPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    fn set_phase(&self, phase: MonitorPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub async fn status(&self, running: bool) -> MonitorStatus {
        MonitorStatus {
            running,
            phase: self.phase(),
            last_tick: self.last_tick.lock().await.clone(),
            feeds: self.health.lock().await.clone(),
            adapters: self.adapters.feeds(),
        }
    }

    /// Run one full pass over active users
    pub async fn tick(&self) -> TickReport {
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.tick_until(&mut shutdown_rx).await
    }

    /// Run one pass, stopping early at the next tenant or feed boundary once
    /// `shutdown` flips to true. A pass already in progress is waited for.
    #[instrument(skip_all)]
    pub async fn tick_until(&self, shutdown: &mut watch::Receiver<bool>) -> TickReport {
        let _pass = self.tick_lock.lock().await;
        let started = Instant::now();
        let mut report = TickReport {
            started_at: Some(Utc::now()),
            ..TickReport::default()
        };

        self.set_phase(MonitorPhase::Scanning);
        let users = self.registry.list_active(self.config.active_window()).await;
        report.active_users = users.len();
        debug!(active_users = users.len(), "Scanning active users");

        'users: for user_id in &users {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            let config = self.registry.get_config(user_id).await;
            let feeds = config.schedulable_feeds();
            if feeds.is_empty() {
                continue;
            }

            self.set_phase(MonitorPhase::PerUserCheck);
            report.users_checked += 1;
            let state = self.registry.user_state(user_id).await;
            let mut called_adapter = false;

            for feed in feeds {
                if *shutdown.borrow() {
                    report.interrupted = true;
                    break 'users;
                }

                let checkpoint = state.checkpoint(feed).cloned().unwrap_or_default();
                match self.check_feed(user_id, feed, &config, &checkpoint).await {
                    FeedOutcome::Skipped => report.checks_skipped += 1,
                    FeedOutcome::Checked { enqueued } => {
                        called_adapter = true;
                        report.checks_run += 1;
                        report.notifications_enqueued += enqueued;
                    }
                    FeedOutcome::Failed => {
                        called_adapter = true;
                        report.checks_run += 1;
                        report.failures += 1;
                    }
                }
            }

            if called_adapter && self.config.inter_user_pause_millis > 0 {
                let pause = Duration::from_millis(self.config.inter_user_pause_millis);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.wait_for(|stopped| *stopped) => {
                        report.interrupted = true;
                        break 'users;
                    }
                }
            }
        }

        if !report.interrupted {
            report.swept = self.store.retention_sweep(self.config.retention_days).await;
        }

        report.finished_at = Some(Utc::now());
        telemetry::record_tick(started.elapsed().as_secs_f64(), report.active_users);
        self.set_phase(MonitorPhase::Idle);

        if report.notifications_enqueued > 0 || report.failures > 0 {
            info!(
                active_users = report.active_users,
                users_checked = report.users_checked,
                checks_run = report.checks_run,
                enqueued = report.notifications_enqueued,
                failures = report.failures,
                "Monitor tick completed"
            );
        } else {
            debug!(active_users = report.active_users, "Monitor tick completed");
        }

        *self.last_tick.lock().await = Some(report.clone());
        report
    }

    #[instrument(skip_all, fields(user_id = %user_id, feed = %feed))]
    async fn check_feed(
        &self,
        user_id: &str,
        feed: FeedType,
        config: &SubscriptionConfig,
        checkpoint: &FeedCheckpoint,
    ) -> FeedOutcome {
        let Some(adapter) = self.adapters.get(feed) else {
            debug!("No adapter registered, skipping feed");
            return FeedOutcome::Skipped;
        };

        let now = Utc::now();
        if let Some(last_check) = checkpoint.last_check {
            if now - last_check < config.check_interval(feed) {
                debug!(last_check = %last_check, "Feed not due yet");
                return FeedOutcome::Skipped;
            }
        }

        let limit = config
            .max_per_check(feed)
            .min(self.config.max_per_type_per_cycle);
        let query = FeedQuery {
            user_id: user_id.to_string(),
            feed,
            keywords: config.keywords(feed).to_vec(),
            categories: config.categories(feed).to_vec(),
            region: (feed == FeedType::Grants && !config.region.is_empty())
                .then(|| config.region.clone()),
            since: checkpoint
                .last_check
                .unwrap_or_else(|| now - chrono::Duration::hours(FIRST_CHECK_LOOKBACK_HOURS)),
            limit,
        };

        match self.call_adapter(adapter.as_ref(), &query).await {
            Ok(items) => {
                self.mark_healthy(feed, now).await;
                let enqueued = self.enqueue_new(user_id, feed, items, limit).await;
                // Cadence advances on every completed check, even an empty one
                self.registry.record_check(user_id, feed, now, enqueued).await;
                FeedOutcome::Checked { enqueued }
            }
            Err(e) => {
                warn!(error = %e, "Source adapter failed");
                telemetry::record_adapter_failure(feed, failure_reason(&e));
                self.mark_degraded(feed, &e, now).await;
                // A failing source is retried at its own cadence, not every wake
                self.registry.record_check(user_id, feed, now, 0).await;
                FeedOutcome::Failed
            }
        }
    }

    /// Call an adapter with a timeout, turning panics into errors
    async fn call_adapter(
        &self,
        adapter: &dyn SourceAdapter,
        query: &FeedQuery,
    ) -> Result<Vec<FeedItem>, AdapterError> {
        let call = AssertUnwindSafe(adapter.check(query)).catch_unwind();

        let outcome = if self.config.adapter_timeout_seconds > 0 {
            let limit = Duration::from_secs(self.config.adapter_timeout_seconds);
            tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AdapterError::Timeout(self.config.adapter_timeout_seconds))?
        } else {
            call.await
        };

        outcome.unwrap_or_else(|_| Err(AdapterError::RequestFailed("adapter panicked".to_string())))
    }

    /// Drop duplicates (within the batch and against stored history) and
    /// enqueue up to `limit` items
    async fn enqueue_new(
        &self,
        user_id: &str,
        feed: FeedType,
        items: Vec<FeedItem>,
        limit: usize,
    ) -> usize {
        let mut batch = HashSet::new();
        let mut enqueued = 0;

        for item in items {
            if enqueued >= limit {
                break;
            }

            let fingerprint = item.fingerprint();
            if !batch.insert(fingerprint.clone()) {
                continue;
            }
            if self.store.seen(user_id, feed, &fingerprint).await {
                debug!(title = %item.title, "Skipping already delivered item");
                continue;
            }

            let stored = self
                .store
                .enqueue_with_fingerprint(
                    user_id,
                    feed,
                    &item.title,
                    &item.message,
                    item.data,
                    Some(fingerprint),
                )
                .await;
            if stored.is_some() {
                enqueued += 1;
            }
        }

        enqueued
    }

    async fn mark_healthy(&self, feed: FeedType, at: DateTime<Utc>) {
        let mut health = self.health.lock().await;
        if matches!(health.get(&feed), Some(FeedHealth::Degraded { .. })) {
            info!(feed = %feed, "Source adapter recovered");
        }
        health.insert(feed, FeedHealth::Healthy { last_success: at });
    }

    async fn mark_degraded(&self, feed: FeedType, err: &AdapterError, at: DateTime<Utc>) {
        let mut health = self.health.lock().await;
        let next = match health.get(&feed) {
            Some(FeedHealth::Degraded {
                since,
                consecutive_failures,
                ..
            }) => FeedHealth::Degraded {
                error: err.to_string(),
                since: *since,
                consecutive_failures: consecutive_failures.saturating_add(1),
            },
            _ => {
                error!(feed = %feed, error = %err, "Source adapter degraded");
                FeedHealth::Degraded {
                    error: err.to_string(),
                    since: at,
                    consecutive_failures: 1,
                }
            }
        };
        health.insert(feed, next);
    }

    /// Loop until `shutdown` flips: tick, then sleep for the poll interval
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            adapters = ?self.adapters.feeds(),
            "Starting monitor loop"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_seconds.max(1));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.tick_until(&mut shutdown).await;
            if report.interrupted {
                break;
            }

            self.set_phase(MonitorPhase::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }
        }

        self.set_phase(MonitorPhase::Idle);
        info!("Monitor loop stopped");
    }
}

fn failure_reason(err: &AdapterError) -> &'static str {
    match err {
        AdapterError::RequestFailed(_) => "request_failed",
        AdapterError::InvalidResponse(_) => "invalid_response",
        AdapterError::Timeout(_) => "timeout",
        AdapterError::NotConfigured(_) => "not_configured",
    }
}
