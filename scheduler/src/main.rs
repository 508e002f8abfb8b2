// Notification monitor binary entry point

use anyhow::{Context, Result};
use common::bootstrap;
use common::config::Settings;
use common::monitor::StopOutcome;
use common::telemetry;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    telemetry::init_logging(&settings.observability.log_level)?;
    info!("Starting notification monitor");

    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!(
        database_url = %settings.database.url,
        poll_interval_seconds = settings.monitor.poll_interval_seconds,
        active_window_hours = settings.monitor.active_window_hours,
        "Configuration loaded"
    );

    if let Err(e) = telemetry::init_metrics(settings.observability.metrics_port) {
        // Metrics are optional; keep monitoring without them
        warn!(error = %e, "Metrics exporter unavailable");
    }

    let service = bootstrap::init_service(&settings).await?;

    service.start_background_monitoring().await;

    // Set up graceful shutdown
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal, stopping monitor");

    match service.shutdown().await {
        StopOutcome::TimedOut => warn!("Monitor was still finishing a check at exit"),
        outcome => info!(?outcome, "Monitor stopped"),
    }

    Ok(())
}
