// Telemetry module for structured logging and metrics

use crate::models::FeedType;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Initialize the Prometheus exporter and describe all metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "notifications_enqueued_total",
        "Total number of notifications stored"
    );
    describe_counter!(
        "notifications_delivered_total",
        "Total number of notifications handed to their owner"
    );
    describe_counter!(
        "notifications_swept_total",
        "Total number of delivered notifications removed by retention"
    );
    describe_counter!(
        "adapter_failures_total",
        "Total number of failed source adapter checks"
    );
    describe_histogram!(
        "monitor_tick_duration_seconds",
        "Duration of one monitor pass over active users"
    );
    describe_gauge!(
        "monitor_active_users",
        "Active users considered in the last monitor pass"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_notification_enqueued(feed: FeedType) {
    counter!("notifications_enqueued_total", "type" => feed.as_str()).increment(1);
}

#[inline]
pub fn record_notifications_delivered(count: usize) {
    counter!("notifications_delivered_total").increment(count as u64);
}

#[inline]
pub fn record_notifications_swept(count: u64) {
    counter!("notifications_swept_total").increment(count);
}

#[inline]
pub fn record_adapter_failure(feed: FeedType, reason: &str) {
    counter!(
        "adapter_failures_total",
        "type" => feed.as_str(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_tick(duration_seconds: f64, active_users: usize) {
    histogram!("monitor_tick_duration_seconds").record(duration_seconds);
    gauge!("monitor_active_users").set(active_users as f64);
}
