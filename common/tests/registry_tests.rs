// Tests for the user registry against a file-backed SQLite database

use chrono::{Duration, Utc};
use common::config::DatabaseConfig;
use common::db::DbPool;
use common::models::{DeviceInfo, FeedType};
use common::registry::{generate_user_id, UserRegistry};
use common::subscription::{SubscriptionConfig, CURRENT_CONFIG_VERSION};
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const SALT: &str = "test-salt";

async fn test_registry() -> (TempDir, UserRegistry) {
    let (dir, _pool, registry) = test_registry_with_pool().await;
    (dir, registry)
}

async fn test_registry_with_pool() -> (TempDir, DbPool, UserRegistry) {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("registry.db").display()),
        max_connections: 4,
        min_connections: 1,
        connect_timeout_seconds: 5,
        busy_timeout_seconds: 5,
    };
    let pool = DbPool::new(&config).await.unwrap();
    let registry = UserRegistry::new(pool.clone(), SALT);
    (dir, pool, registry)
}

/// Stored config documents the registry cannot read
const MALFORMED_CONFIGS: [&str; 3] = ["[1, 2, 3]", "{not json", r#"{"version": 99}"#];

async fn write_raw_config(pool: &DbPool, user_id: &str, raw: &str) {
    sqlx::query("UPDATE users SET config = ?1 WHERE user_id = ?2")
        .bind(raw)
        .bind(user_id)
        .execute(pool.pool())
        .await
        .unwrap();
}

async fn read_raw_config(pool: &DbPool, user_id: &str) -> String {
    sqlx::query_scalar("SELECT config FROM users WHERE user_id = ?1")
        .bind(user_id)
        .fetch_one(pool.pool())
        .await
        .unwrap()
}

async fn read_last_active(pool: &DbPool, user_id: &str) -> i64 {
    sqlx::query_scalar("SELECT last_active FROM users WHERE user_id = ?1")
        .bind(user_id)
        .fetch_one(pool.pool())
        .await
        .unwrap()
}

proptest! {
    /// Property: the same fingerprint always resolves to the same tenant id
    #[test]
    fn property_user_id_is_deterministic(ip in "[0-9.]{7,15}", ua in ".{0,64}") {
        let first = generate_user_id(SALT, &ip, &ua);
        let second = generate_user_id(SALT, &ip, &ua);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.starts_with("user_"));
        prop_assert_eq!(first.len(), "user_".len() + 16);
        prop_assert!(first["user_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Property: a different user agent yields a different tenant
    #[test]
    fn property_user_agent_changes_identity(ip in "[0-9.]{7,15}", ua in "[a-z]{1,32}") {
        let a = generate_user_id(SALT, &ip, &ua);
        let b = generate_user_id(SALT, &ip, &format!("{}-other", ua));
        prop_assert_ne!(a, b);
    }
}

#[tokio::test]
async fn test_register_creates_user_with_defaults() {
    let (_dir, registry) = test_registry().await;

    let device = DeviceInfo {
        device_id: None,
        device_name: Some("Laptop".to_string()),
    };
    let registration = registry.register("1.2.3.4", "UA1", device).await.unwrap();

    assert!(registration.created);
    assert_eq!(registration.user_id, generate_user_id(SALT, "1.2.3.4", "UA1"));
    assert_eq!(registration.config.device_name, "Laptop");
    assert!(registration.config.schedulable_feeds().is_empty());
}

#[tokio::test]
async fn test_reregistration_returns_stored_config() {
    let (_dir, registry) = test_registry().await;

    let first = registry
        .register("1.2.3.4", "UA1", DeviceInfo::default())
        .await
        .unwrap();
    assert!(
        registry
            .update_config(
                &first.user_id,
                &json!({"papers_notifications": true, "papers_keywords": ["quantum"]}),
            )
            .await
    );

    let second = registry
        .register("1.2.3.4", "UA1", DeviceInfo::default())
        .await
        .unwrap();

    assert!(!second.created);
    assert_eq!(second.user_id, first.user_id);
    assert_ne!(second.session_id, first.session_id);
    assert!(second.config.papers_notifications);
    assert_eq!(second.config.papers_keywords, vec!["quantum".to_string()]);
}

#[tokio::test]
async fn test_get_config_for_unknown_user_is_default() {
    let (_dir, registry) = test_registry().await;
    let config = registry.get_config("user_doesnotexist").await;
    assert_eq!(config, common::subscription::SubscriptionConfig::default());
}

#[tokio::test]
async fn test_update_config_preserves_untouched_keys() {
    let (_dir, registry) = test_registry().await;
    let user_id = registry
        .register("10.0.0.1", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;

    assert!(
        registry
            .update_config(&user_id, &json!({"patent_keywords": ["battery"], "patent_notifications": true}))
            .await
    );
    assert!(
        registry
            .update_config(&user_id, &json!({"papers_check_interval": 600}))
            .await
    );

    let config = registry.get_config(&user_id).await;
    assert!(config.patent_notifications);
    assert_eq!(config.patent_keywords, vec!["battery".to_string()]);
    assert_eq!(config.papers_check_interval, 600);
}

#[tokio::test]
async fn test_update_config_creates_missing_user() {
    let (_dir, registry) = test_registry().await;

    assert!(
        registry
            .update_config("user_0123456789abcdef", &json!({"email_notifications": true}))
            .await
    );

    let user = registry.find_user("user_0123456789abcdef").await.unwrap();
    assert_eq!(user.device_name, "Web device");
    assert!(user.config.email_notifications);
}

#[tokio::test]
async fn test_update_config_rejects_wrong_types() {
    let (_dir, registry) = test_registry().await;
    let user_id = registry
        .register("10.0.0.2", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;

    assert!(
        !registry
            .update_config(&user_id, &json!({"papers_keywords": "not-a-list"}))
            .await
    );
    assert!(registry.get_config(&user_id).await.papers_keywords.is_empty());
}

#[tokio::test]
async fn test_list_active_respects_window() {
    let (_dir, registry) = test_registry().await;

    let fresh = registry
        .register("10.0.0.3", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;
    let stale = registry
        .register("10.0.0.4", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;
    assert!(
        registry
            .set_last_active(&stale, Utc::now() - Duration::hours(25))
            .await
    );

    let active = registry.list_active(Duration::hours(24)).await;
    assert!(active.contains(&fresh));
    assert!(!active.contains(&stale));

    assert!(registry.touch(&stale).await);
    assert!(registry.list_active(Duration::hours(24)).await.contains(&stale));
}

#[tokio::test]
async fn test_record_check_updates_state() {
    let (_dir, registry) = test_registry().await;
    let user_id = registry
        .register("10.0.0.5", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;

    let empty = registry.user_state(&user_id).await;
    assert!(empty.papers.last_check.is_none());

    let at = Utc::now();
    registry.record_check(&user_id, FeedType::Papers, at, 2).await;
    registry.record_check(&user_id, FeedType::Papers, at, 3).await;

    let state = registry.user_state(&user_id).await;
    assert_eq!(
        state.papers.last_check.map(|t| t.timestamp_millis()),
        Some(at.timestamp_millis())
    );
    assert_eq!(state.papers.count, 5);
    assert!(state.patents.last_check.is_none());
}

#[tokio::test]
async fn test_list_active_with_unbounded_window_returns_everyone() {
    let (_dir, registry) = test_registry().await;
    let user_id = registry
        .register("10.0.0.6", "UA", DeviceInfo::default())
        .await
        .unwrap()
        .user_id;
    assert!(
        registry
            .set_last_active(&user_id, Utc::now() - Duration::days(3650))
            .await
    );

    let active = registry.list_active(Duration::days(100_000_000)).await;
    assert_eq!(active, vec![user_id]);
}

#[tokio::test]
async fn test_get_config_resets_malformed_config() {
    let (_dir, pool, registry) = test_registry_with_pool().await;

    for (i, raw) in MALFORMED_CONFIGS.iter().enumerate() {
        let user_id = registry
            .register(&format!("10.1.0.{}", i), "UA", DeviceInfo::default())
            .await
            .unwrap()
            .user_id;
        assert!(
            registry
                .set_last_active(&user_id, Utc::now() - Duration::days(10))
                .await
        );
        let last_active = read_last_active(&pool, &user_id).await;
        write_raw_config(&pool, &user_id, raw).await;

        assert_eq!(registry.get_config(&user_id).await, SubscriptionConfig::default());

        // Defaults are written back and the read does not count as contact
        let stored = SubscriptionConfig::from_stored(&read_raw_config(&pool, &user_id).await);
        assert_eq!(stored.unwrap(), SubscriptionConfig::default());
        assert_eq!(read_last_active(&pool, &user_id).await, last_active);
        assert!(!registry.list_active(Duration::days(1)).await.contains(&user_id));
    }
}

#[tokio::test]
async fn test_register_resets_malformed_config_for_returning_user() {
    let (_dir, pool, registry) = test_registry_with_pool().await;

    for (i, raw) in MALFORMED_CONFIGS.iter().enumerate() {
        let ip = format!("10.2.0.{}", i);
        let user_id = registry
            .register(&ip, "UA", DeviceInfo::default())
            .await
            .unwrap()
            .user_id;
        assert!(
            registry
                .update_config(
                    &user_id,
                    &json!({"papers_notifications": true, "papers_keywords": ["quantum"]}),
                )
                .await
        );
        write_raw_config(&pool, &user_id, raw).await;

        let again = registry.register(&ip, "UA", DeviceInfo::default()).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.user_id, user_id);
        assert!(!again.config.papers_notifications);
        assert!(again.config.papers_keywords.is_empty());
        assert_eq!(again.config.version, CURRENT_CONFIG_VERSION);
        assert!(SubscriptionConfig::from_stored(&read_raw_config(&pool, &user_id).await).is_ok());
    }
}

#[tokio::test]
async fn test_update_config_applies_on_top_of_malformed_config() {
    let (_dir, pool, registry) = test_registry_with_pool().await;

    for (i, raw) in MALFORMED_CONFIGS.iter().enumerate() {
        let user_id = registry
            .register(&format!("10.3.0.{}", i), "UA", DeviceInfo::default())
            .await
            .unwrap()
            .user_id;
        write_raw_config(&pool, &user_id, raw).await;

        assert!(
            registry
                .update_config(&user_id, &json!({"grants_keywords": ["fusion"]}))
                .await
        );

        let config = registry.get_config(&user_id).await;
        assert_eq!(config.grants_keywords, vec!["fusion".to_string()]);
        assert!(!config.grants_notifications);
        assert_eq!(config.version, CURRENT_CONFIG_VERSION);
    }
}
