// Property-based tests for configuration loading and subscription settings

use common::config::Settings;
use common::models::FeedType;
use common::subscription::{SubscriptionConfig, CURRENT_CONFIG_VERSION};
use proptest::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn config_file(poll_interval: u64, retention_days: u32, log_level: &str) -> String {
    format!(
        r#"
[database]
url = "sqlite://notifications.db"
max_connections = 4
min_connections = 1
connect_timeout_seconds = 30

[identity]
salt = "property-salt"

[monitor]
poll_interval_seconds = {}
active_window_hours = 24
inter_user_pause_millis = 1000
max_per_type_per_cycle = 5
retention_days = {}
adapter_timeout_seconds = 30
shutdown_timeout_seconds = 5

[adapters]
papers = "http://localhost:8001/papers"

[observability]
log_level = "{}"
metrics_port = 9090
"#,
        poll_interval, retention_days, log_level
    )
}

proptest! {
    /// Property: file values are loaded as written and validate
    #[test]
    fn property_config_file_round_trips(
        poll_interval in 1u64..3600u64,
        retention_days in 1u32..365u32,
        log_level in prop::sample::select(vec!["trace", "debug", "info", "warn", "error"])
    ) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("default.toml"),
            config_file(poll_interval, retention_days, log_level),
        )
        .unwrap();

        let settings = Settings::load_from_path(temp_dir.path()).unwrap();
        prop_assert!(settings.validate().is_ok());
        prop_assert_eq!(settings.monitor.poll_interval_seconds, poll_interval);
        prop_assert_eq!(settings.monitor.retention_days, retention_days);
        prop_assert_eq!(settings.observability.log_level, log_level);
        prop_assert_eq!(settings.database.busy_timeout_seconds, 10);
        prop_assert_eq!(settings.notifications.pending_fetch_limit, 20);
        prop_assert_eq!(
            settings.adapters.papers.as_deref(),
            Some("http://localhost:8001/papers")
        );
    }

    /// Property: a patch touching one key leaves every other key unchanged
    #[test]
    fn property_merge_preserves_untouched_keys(
        keywords in prop::collection::vec("[a-z]{1,12}", 0..5),
        interval in 0u64..100_000u64,
    ) {
        let base = SubscriptionConfig {
            patent_notifications: true,
            patent_keywords: vec!["graphene".to_string()],
            region: "Madrid".to_string(),
            ..SubscriptionConfig::default()
        };

        let merged = base
            .merge_patch(&json!({"papers_keywords": keywords, "papers_check_interval": interval}))
            .unwrap();

        prop_assert_eq!(&merged.papers_keywords, &keywords);
        prop_assert_eq!(merged.papers_check_interval, interval);
        prop_assert!(merged.patent_notifications);
        prop_assert_eq!(merged.patent_keywords, vec!["graphene".to_string()]);
        prop_assert_eq!(merged.region, "Madrid");
        prop_assert_eq!(merged.version, CURRENT_CONFIG_VERSION);
    }

    /// Property: a stored config always reads back identically
    #[test]
    fn property_stored_config_reads_back(
        papers in any::<bool>(),
        grants in any::<bool>(),
        region in "[A-Za-z ]{0,16}",
        max_papers in 0u32..50u32,
    ) {
        let config = SubscriptionConfig {
            papers_notifications: papers,
            grants_notifications: grants,
            region,
            max_papers_per_check: max_papers,
            ..SubscriptionConfig::default()
        };
        let restored = SubscriptionConfig::from_stored(&config.to_stored().unwrap()).unwrap();
        prop_assert_eq!(restored, config);
    }

    /// Property: only enabled feeds with their required filters are scheduled
    #[test]
    fn property_schedulable_feeds_need_filters(
        enable in any::<[bool; 4]>(),
        with_filters in any::<bool>(),
    ) {
        let filters = if with_filters { vec!["x".to_string()] } else { Vec::new() };
        let config = SubscriptionConfig {
            papers_notifications: enable[0],
            patent_notifications: enable[1],
            grants_notifications: enable[2],
            email_notifications: enable[3],
            papers_keywords: filters.clone(),
            patent_keywords: filters.clone(),
            grants_keywords: filters,
            ..SubscriptionConfig::default()
        };

        let feeds = config.schedulable_feeds();
        prop_assert_eq!(feeds.contains(&FeedType::Papers), enable[0] && with_filters);
        prop_assert_eq!(feeds.contains(&FeedType::Patents), enable[1] && with_filters);
        prop_assert_eq!(feeds.contains(&FeedType::Grants), enable[2] && with_filters);
        prop_assert_eq!(feeds.contains(&FeedType::Email), enable[3]);
        prop_assert!(!feeds.contains(&FeedType::Test));
    }
}

#[test]
fn test_missing_optional_sections_use_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let minimal = config_file(60, 7, "info").replace(
        "[adapters]\npapers = \"http://localhost:8001/papers\"\n",
        "",
    );
    fs::write(temp_dir.path().join("default.toml"), minimal).unwrap();

    let settings = Settings::load_from_path(temp_dir.path()).unwrap();
    assert!(settings.adapters.endpoints().is_empty());
    assert_eq!(settings.notifications.list_default_limit, 50);
}

#[test]
fn test_invalid_adapter_endpoint_fails_validation() {
    let mut settings = Settings::default();
    settings.adapters.grants = Some("ftp://example.com/grants".to_string());
    assert!(settings.validate().is_err());
}
