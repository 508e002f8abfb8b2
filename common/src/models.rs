use crate::subscription::SubscriptionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Feed types
// ============================================================================

/// Kind of notification source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Papers,
    Patents,
    Grants,
    Email,
    Test,
}

impl FeedType {
    /// Feed types polled by the monitor. `Test` is only produced on demand.
    pub const SCHEDULED: [FeedType; 4] = [
        FeedType::Papers,
        FeedType::Patents,
        FeedType::Grants,
        FeedType::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedType::Papers => "papers",
            FeedType::Patents => "patents",
            FeedType::Grants => "grants",
            FeedType::Email => "email",
            FeedType::Test => "test",
        }
    }

    pub fn is_scheduled(&self) -> bool {
        !matches!(self, FeedType::Test)
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "papers" | "paper" => Ok(FeedType::Papers),
            "patents" | "patent" => Ok(FeedType::Patents),
            "grants" | "grant" => Ok(FeedType::Grants),
            "email" | "emails" => Ok(FeedType::Email),
            "test" => Ok(FeedType::Test),
            other => Err(format!("Unknown feed type: {}", other)),
        }
    }
}

// ============================================================================
// Users
// ============================================================================

/// A tenant, identified by its client fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub session_id: String,
    pub device_id: String,
    pub device_name: String,
    pub config: SubscriptionConfig,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Device details supplied by the client on registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Result of a successful registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub user_id: String,
    pub session_id: String,
    pub config: SubscriptionConfig,
    pub created: bool,
}

/// Per-feed polling bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedCheckpoint {
    pub last_check: Option<DateTime<Utc>>,
    pub count: i64,
}

/// Per-user polling state, one checkpoint per scheduled feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: String,
    pub papers: FeedCheckpoint,
    pub patents: FeedCheckpoint,
    pub grants: FeedCheckpoint,
    pub email: FeedCheckpoint,
}

impl UserState {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn checkpoint(&self, feed: FeedType) -> Option<&FeedCheckpoint> {
        match feed {
            FeedType::Papers => Some(&self.papers),
            FeedType::Patents => Some(&self.patents),
            FeedType::Grants => Some(&self.grants),
            FeedType::Email => Some(&self.email),
            FeedType::Test => None,
        }
    }
}

/// Aggregate view of a user for the request layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub device_name: String,
    pub config: SubscriptionConfig,
    pub state: UserState,
    pub total_notifications: i64,
    pub notification_counts: BTreeMap<FeedType, i64>,
}

// ============================================================================
// Notifications
// ============================================================================

/// A stored notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: FeedType,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
}

/// A notification about to be inserted
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub notification_type: FeedType,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Which notifications a delete applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteSelector {
    Id(i64),
    Type(FeedType),
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub removed: u64,
    /// Set when a specific id was requested and no owned row matched
    pub not_found: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub total: i64,
    pub pending: i64,
    pub delivered: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSummary {
    pub total: i64,
    pub by_type: BTreeMap<FeedType, TypeSummary>,
}

// ============================================================================
// Timestamp helpers
// ============================================================================

/// Timestamps are persisted as UTC epoch milliseconds
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_type_parses_singular_and_plural() {
        assert_eq!("paper".parse::<FeedType>().unwrap(), FeedType::Papers);
        assert_eq!("patents".parse::<FeedType>().unwrap(), FeedType::Patents);
        assert!("weather".parse::<FeedType>().is_err());
    }

    #[test]
    fn test_feed_type_serializes_lowercase() {
        let json = serde_json::to_string(&FeedType::Grants).unwrap();
        assert_eq!(json, "\"grants\"");
    }

    #[test]
    fn test_test_feed_is_not_scheduled() {
        assert!(!FeedType::Test.is_scheduled());
        assert!(!FeedType::SCHEDULED.contains(&FeedType::Test));
    }

    #[test]
    fn test_millis_round_trip_keeps_millisecond_precision() {
        let now = Utc::now();
        let restored = from_millis(to_millis(now));
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let n = Notification {
            id: 1,
            user_id: "user_x".to_string(),
            notification_type: FeedType::Papers,
            title: "t".to_string(),
            message: "m".to_string(),
            data: serde_json::json!({}),
            created_at: Utc::now(),
            delivered: false,
        };
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "papers");
    }
}
