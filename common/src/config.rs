// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for `monitor.retention_days` (one hundred years)
pub const MAX_RETENTION_DAYS: u32 = 36_500;
/// Upper bound for `monitor.active_window_hours` (one hundred years)
pub const MAX_ACTIVE_WINDOW_HOURS: u64 = 876_000;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub identity: IdentityConfig,
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub adapters: AdapterSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_seconds: u64,
}

fn default_busy_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Mixed into every fingerprint hash; rotating it re-keys every tenant
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub poll_interval_seconds: u64,
    pub active_window_hours: u64,
    pub inter_user_pause_millis: u64,
    pub max_per_type_per_cycle: usize,
    pub retention_days: u32,
    /// 0 disables the per-call timeout
    pub adapter_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub pending_fetch_limit: u32,
    pub list_default_limit: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            pending_fetch_limit: 20,
            list_default_limit: 50,
        }
    }
}

/// Endpoints for the generic HTTP feed adapter, one per feed type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default)]
    pub papers: Option<String>,
    #[serde(default)]
    pub patents: Option<String>,
    #[serde(default)]
    pub grants: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.database.min_connections > self.database.max_connections {
            return Err("Database min_connections cannot exceed max_connections".to_string());
        }

        if self.identity.salt.is_empty() {
            return Err("Identity salt cannot be empty".to_string());
        }

        if self.monitor.poll_interval_seconds == 0 {
            return Err("Monitor poll_interval_seconds must be greater than 0".to_string());
        }
        if self.monitor.active_window_hours == 0 {
            return Err("Monitor active_window_hours must be greater than 0".to_string());
        }
        if self.monitor.active_window_hours > MAX_ACTIVE_WINDOW_HOURS {
            return Err(format!(
                "Monitor active_window_hours cannot exceed {}",
                MAX_ACTIVE_WINDOW_HOURS
            ));
        }
        if self.monitor.max_per_type_per_cycle == 0 {
            return Err("Monitor max_per_type_per_cycle must be greater than 0".to_string());
        }
        if self.monitor.retention_days == 0 {
            return Err("Monitor retention_days must be greater than 0".to_string());
        }
        if self.monitor.retention_days > MAX_RETENTION_DAYS {
            return Err(format!(
                "Monitor retention_days cannot exceed {}",
                MAX_RETENTION_DAYS
            ));
        }

        if self.notifications.pending_fetch_limit == 0 {
            return Err("Notifications pending_fetch_limit must be greater than 0".to_string());
        }

        for (feed, endpoint) in self.adapters.endpoints() {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(format!("Adapter endpoint for {} must be an http(s) URL", feed));
            }
        }

        Ok(())
    }
}

impl AdapterSettings {
    /// Configured (feed name, endpoint) pairs
    pub fn endpoints(&self) -> Vec<(&'static str, &str)> {
        [
            ("papers", self.papers.as_deref()),
            ("patents", self.patents.as_deref()),
            ("grants", self.grants.as_deref()),
            ("email", self.email.as_deref()),
        ]
        .into_iter()
        .filter_map(|(feed, endpoint)| endpoint.map(|e| (feed, e)))
        .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://notifications.db".to_string(),
                max_connections: 8,
                min_connections: 1,
                connect_timeout_seconds: 30,
                busy_timeout_seconds: 10,
            },
            identity: IdentityConfig {
                salt: "change-me-in-production".to_string(),
            },
            monitor: MonitorSettings {
                poll_interval_seconds: 60,
                active_window_hours: 24,
                inter_user_pause_millis: 1000,
                max_per_type_per_cycle: 5,
                retention_days: 7,
                adapter_timeout_seconds: 30,
                shutdown_timeout_seconds: 5,
            },
            notifications: NotificationSettings::default(),
            adapters: AdapterSettings::default(),
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_poll_interval() {
        let mut settings = Settings::default();
        settings.monitor.poll_interval_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_monitor_windows() {
        let mut settings = Settings::default();
        settings.monitor.retention_days = MAX_RETENTION_DAYS;
        settings.monitor.active_window_hours = MAX_ACTIVE_WINDOW_HOURS;
        assert!(settings.validate().is_ok());

        settings.monitor.retention_days = u32::MAX;
        assert!(settings.validate().is_err());

        settings.monitor.retention_days = MAX_RETENTION_DAYS;
        settings.monitor.active_window_hours = u64::MAX;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_salt() {
        let mut settings = Settings::default();
        settings.identity.salt = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_non_http_adapter_endpoint() {
        let mut settings = Settings::default();
        settings.adapters.papers = Some("ftp://feeds.local/papers".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_adapter_endpoints_skip_unconfigured_feeds() {
        let mut settings = Settings::default();
        settings.adapters.patents = Some("http://localhost:8081/patents".to_string());
        let endpoints = settings.adapters.endpoints();
        assert_eq!(endpoints, vec![("patents", "http://localhost:8081/patents")]);
    }
}
