// Source adapters
// The contract external feed checkers satisfy, and the registry the monitor
// resolves them from.

pub mod http;

use crate::errors::AdapterError;
use crate::models::FeedType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

pub use http::HttpFeedAdapter;

/// What a tenant wants from one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedQuery {
    pub user_id: String,
    pub feed: FeedType,
    pub keywords: Vec<String>,
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Only items newer than this are wanted
    pub since: DateTime<Utc>,
    /// Upper bound on items the core will keep
    pub limit: usize,
}

/// A candidate notification returned by an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub message: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl FeedItem {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            data,
        }
    }

    /// Content hash used to drop items a tenant has already been sent.
    ///
    /// A stable identifier in `data` (`url`, then `id`) wins over the
    /// display text, which adapters often decorate.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let key = ["url", "id"]
            .iter()
            .find_map(|field| self.data.get(*field).filter(|v| !v.is_null()));

        match key {
            Some(value) => {
                hasher.update(b"key:");
                hasher.update(value.to_string().as_bytes());
            }
            None => {
                hasher.update(b"text:");
                hasher.update(self.title.as_bytes());
                hasher.update(b"\n");
                hasher.update(self.message.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }
}

/// Contract for a feed checker.
///
/// Adapters share no mutable state with the core. Calls may be slow and may
/// fail; the monitor bounds and isolates every call.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Feed this adapter serves
    fn feed_type(&self) -> FeedType;

    /// Return candidate items newer than `query.since`
    async fn check(&self, query: &FeedQuery) -> Result<Vec<FeedItem>, AdapterError>;
}

/// Adapters keyed by the feed they serve
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<FeedType, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own feed type, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        let feed = adapter.feed_type();
        if self.adapters.insert(feed, adapter).is_some() {
            tracing::warn!(feed = %feed, "Replaced existing source adapter");
        }
        self
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, feed: FeedType) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&feed).cloned()
    }

    pub fn feeds(&self) -> Vec<FeedType> {
        let mut feeds: Vec<FeedType> = self.adapters.keys().copied().collect();
        feeds.sort();
        feeds
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
