// Bootstrap utilities for binary initialization

use crate::adapters::{AdapterRegistry, HttpFeedAdapter};
use crate::config::Settings;
use crate::db::DbPool;
use crate::models::FeedType;
use crate::service::NotificationService;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize database pool and apply migrations
///
/// # Errors
/// Returns error if the database cannot be opened or migrated
#[tracing::instrument(skip(settings))]
pub async fn init_database_pool(settings: &Settings) -> Result<DbPool> {
    info!("Initializing database pool");

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    info!("Database pool initialized");
    Ok(db_pool)
}

/// Build an HTTP adapter for every feed with a configured endpoint
///
/// # Errors
/// Returns error if a feed name is unknown or an HTTP client cannot be built
#[tracing::instrument(skip(settings))]
pub fn build_adapters(settings: &Settings) -> Result<AdapterRegistry> {
    let mut adapters = AdapterRegistry::new();

    for (feed, endpoint) in settings.adapters.endpoints() {
        let feed: FeedType = feed
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let adapter = HttpFeedAdapter::new(feed, endpoint, settings.monitor.adapter_timeout_seconds)
            .with_context(|| format!("Failed to build adapter for {}", feed))?;
        info!(feed = %feed, endpoint = %endpoint, "Source adapter configured");
        adapters.register(Arc::new(adapter));
    }

    if adapters.is_empty() {
        warn!("No source adapters configured, the monitor will not produce notifications");
    }

    Ok(adapters)
}

/// Open the database, build adapters and assemble the service
///
/// # Errors
/// Returns error if the pool or any adapter cannot be initialized
pub async fn init_service(settings: &Settings) -> Result<Arc<NotificationService>> {
    let db_pool = init_database_pool(settings).await?;
    let adapters = build_adapters(settings)?;
    Ok(Arc::new(NotificationService::new(settings, db_pool, adapters)))
}
