// Versioned per-tenant subscription settings
//
// Stored as a JSON document in `users.config`. Every field has a default so a
// partially written or older document always deserializes; structural changes
// between versions go through `migrate`.

use crate::errors::ConfigUpdateError;
use crate::models::FeedType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CURRENT_CONFIG_VERSION: u32 = 2;

/// Per-tenant notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub version: u32,

    pub email_notifications: bool,
    pub patent_notifications: bool,
    pub papers_notifications: bool,
    pub grants_notifications: bool,

    pub patent_keywords: Vec<String>,
    pub papers_keywords: Vec<String>,
    pub papers_categories: Vec<String>,
    pub grants_keywords: Vec<String>,
    pub grants_categories: Vec<String>,

    /// Seconds between checks, per feed
    pub email_check_interval: u64,
    pub patent_check_interval: u64,
    pub papers_check_interval: u64,
    pub grants_check_interval: u64,

    pub max_email_per_check: u32,
    pub max_patents_per_check: u32,
    pub max_papers_per_check: u32,
    pub max_grants_per_check: u32,

    pub region: String,
    pub device_name: String,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            email_notifications: false,
            patent_notifications: false,
            papers_notifications: false,
            grants_notifications: false,
            patent_keywords: Vec::new(),
            papers_keywords: Vec::new(),
            papers_categories: Vec::new(),
            grants_keywords: Vec::new(),
            grants_categories: Vec::new(),
            email_check_interval: 300,
            patent_check_interval: 3600,
            papers_check_interval: 1800,
            grants_check_interval: 21600,
            max_email_per_check: 5,
            max_patents_per_check: 3,
            max_papers_per_check: 5,
            max_grants_per_check: 5,
            region: String::new(),
            device_name: "Unknown device".to_string(),
        }
    }
}

impl SubscriptionConfig {
    pub fn with_device_name(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Self::default()
        }
    }

    /// Parse a stored document, upgrading older versions first
    pub fn from_stored(raw: &str) -> Result<Self, ConfigUpdateError> {
        let value: Value = serde_json::from_str(raw)?;
        let migrated = migrate(value)?;
        Ok(serde_json::from_value(migrated)?)
    }

    pub fn to_stored(&self) -> Result<String, ConfigUpdateError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deep-merge `patch` onto this config.
    ///
    /// Nested objects merge key by key, scalars and arrays replace, and a
    /// `null` resets the field to its default. The result must deserialize.
    pub fn merge_patch(&self, patch: &Value) -> Result<Self, ConfigUpdateError> {
        if !patch.is_object() {
            return Err(ConfigUpdateError::InvalidPatch);
        }

        let mut current = serde_json::to_value(self)?;
        deep_merge(&mut current, patch);
        if let Some(obj) = current.as_object_mut() {
            obj.insert("version".to_string(), Value::from(CURRENT_CONFIG_VERSION));
        }

        Ok(serde_json::from_value(current)?)
    }

    pub fn enabled(&self, feed: FeedType) -> bool {
        match feed {
            FeedType::Papers => self.papers_notifications,
            FeedType::Patents => self.patent_notifications,
            FeedType::Grants => self.grants_notifications,
            FeedType::Email => self.email_notifications,
            FeedType::Test => false,
        }
    }

    pub fn keywords(&self, feed: FeedType) -> &[String] {
        match feed {
            FeedType::Papers => &self.papers_keywords,
            FeedType::Patents => &self.patent_keywords,
            FeedType::Grants => &self.grants_keywords,
            FeedType::Email | FeedType::Test => &[],
        }
    }

    pub fn categories(&self, feed: FeedType) -> &[String] {
        match feed {
            FeedType::Papers => &self.papers_categories,
            FeedType::Grants => &self.grants_categories,
            _ => &[],
        }
    }

    pub fn check_interval(&self, feed: FeedType) -> chrono::Duration {
        let seconds = match feed {
            FeedType::Papers => self.papers_check_interval,
            FeedType::Patents => self.patent_check_interval,
            FeedType::Grants => self.grants_check_interval,
            FeedType::Email => self.email_check_interval,
            FeedType::Test => 0,
        };
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(seconds)
    }

    pub fn max_per_check(&self, feed: FeedType) -> usize {
        let max = match feed {
            FeedType::Papers => self.max_papers_per_check,
            FeedType::Patents => self.max_patents_per_check,
            FeedType::Grants => self.max_grants_per_check,
            FeedType::Email => self.max_email_per_check,
            FeedType::Test => 0,
        };
        max as usize
    }

    /// Whether the filters a feed needs before it can be queried are present
    pub fn filters_satisfied(&self, feed: FeedType) -> bool {
        match feed {
            FeedType::Patents => !self.patent_keywords.is_empty(),
            FeedType::Papers => {
                !self.papers_keywords.is_empty() || !self.papers_categories.is_empty()
            }
            FeedType::Grants => !self.region.is_empty() || !self.grants_keywords.is_empty(),
            FeedType::Email => true,
            FeedType::Test => false,
        }
    }

    pub fn is_schedulable(&self, feed: FeedType) -> bool {
        feed.is_scheduled() && self.enabled(feed) && self.filters_satisfied(feed)
    }

    /// Feeds the monitor should consider for this tenant
    pub fn schedulable_feeds(&self) -> Vec<FeedType> {
        FeedType::SCHEDULED
            .into_iter()
            .filter(|feed| self.is_schedulable(*feed))
            .collect()
    }
}

/// Upgrade a stored document to `CURRENT_CONFIG_VERSION`.
///
/// Documents without a `version` key are version 1, which predates the
/// grants feed and the region field.
pub fn migrate(value: Value) -> Result<Value, ConfigUpdateError> {
    let Value::Object(mut obj) = value else {
        return Err(ConfigUpdateError::Invalid(
            "stored config is not an object".to_string(),
        ));
    };

    let mut version = obj
        .get("version")
        .and_then(Value::as_u64)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
        .unwrap_or(1);

    if version > CURRENT_CONFIG_VERSION {
        return Err(ConfigUpdateError::Invalid(format!(
            "config version {} is newer than supported {}",
            version, CURRENT_CONFIG_VERSION
        )));
    }

    if version <= 1 {
        migrate_v1_to_v2(&mut obj);
        version = 2;
    }

    obj.insert("version".to_string(), Value::from(version));
    Ok(Value::Object(obj))
}

fn migrate_v1_to_v2(obj: &mut Map<String, Value>) {
    let defaults = SubscriptionConfig::default();
    obj.entry("grants_notifications")
        .or_insert(Value::Bool(defaults.grants_notifications));
    obj.entry("grants_keywords")
        .or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("grants_categories")
        .or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("grants_check_interval")
        .or_insert(Value::from(defaults.grants_check_interval));
    obj.entry("max_grants_per_check")
        .or_insert(Value::from(defaults.max_grants_per_check));
    obj.entry("region")
        .or_insert_with(|| Value::String(String::new()));
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_obj), Value::Object(patch_obj)) => {
            for (key, patch_value) in patch_obj {
                if patch_value.is_null() {
                    target_obj.remove(key);
                    continue;
                }
                match target_obj.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value);
                    }
                    _ => {
                        target_obj.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
