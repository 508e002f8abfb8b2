// Generic HTTP source adapter
// POSTs the feed query as JSON and reads back candidate items

use crate::adapters::{FeedItem, FeedQuery, SourceAdapter};
use crate::errors::AdapterError;
use crate::models::FeedType;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Accepted response bodies: a bare array or `{"items": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum FeedResponse {
    Items(Vec<FeedItem>),
    Wrapped { items: Vec<FeedItem> },
}

/// Adapter backed by an HTTP endpoint that speaks the feed contract
pub struct HttpFeedAdapter {
    feed: FeedType,
    endpoint: String,
    client: Client,
}

impl HttpFeedAdapter {
    /// Create an adapter for `feed` with the specified request timeout
    pub fn new(
        feed: FeedType,
        endpoint: impl Into<String>,
        timeout_seconds: u64,
    ) -> Result<Self, AdapterError> {
        let mut builder = Client::builder();
        if timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_seconds));
        }
        let client = builder.build().map_err(|e| {
            AdapterError::RequestFailed(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            feed,
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SourceAdapter for HttpFeedAdapter {
    fn feed_type(&self) -> FeedType {
        self.feed
    }

    #[tracing::instrument(skip(self, query), fields(feed = %self.feed, user_id = %query.user_id))]
    async fn check(&self, query: &FeedQuery) -> Result<Vec<FeedItem>, AdapterError> {
        tracing::debug!(endpoint = %self.endpoint, "Checking HTTP feed");

        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await
            .map_err(|e| AdapterError::RequestFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::RequestFailed(format!(
                "Feed endpoint returned status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let body = response.text().await.map_err(|e| {
            AdapterError::RequestFailed(format!("Failed to read response body: {}", e))
        })?;

        let items = match serde_json::from_str::<FeedResponse>(&body) {
            Ok(FeedResponse::Items(items)) | Ok(FeedResponse::Wrapped { items }) => items,
            Err(e) => {
                return Err(AdapterError::InvalidResponse(format!(
                    "Expected a list of feed items: {}",
                    e
                )))
            }
        };

        tracing::debug!(count = items.len(), "HTTP feed returned items");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_reports_its_feed() {
        let adapter = HttpFeedAdapter::new(FeedType::Grants, "http://localhost:1/grants", 5).unwrap();
        assert_eq!(adapter.feed_type(), FeedType::Grants);
        assert_eq!(adapter.endpoint(), "http://localhost:1/grants");
    }

    #[test]
    fn test_wrapped_response_parses() {
        let body = r#"{"items": [{"title": "t", "message": "m"}]}"#;
        let parsed: FeedResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(parsed, FeedResponse::Wrapped { items } if items.len() == 1));
    }
}
