//! AlienVault OTX subscribed-pulses connector.
//!
//! Pages through `GET /api/v1/pulses/subscribed`, authenticated with
//! the `X-OTX-API-KEY` header. The cursor is the newest pulse
//! `modified` timestamp seen so far, replayed as `modified_since` on
//! the next poll.

use crate::http::HttpClient;
use crate::traits::{Cursor, FeedBatch, FeedConfig, FeedConnector, FeedError, FeedResult};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;
use tl_core::{FeedSource, RawRecord};
use tracing::debug;

/// Pages fetched per poll before handing control back to the scheduler.
const MAX_PAGES_PER_POLL: u32 = 10;

/// AlienVault OTX connector.
pub struct OtxConnector {
    config: FeedConfig,
    client: HttpClient,
}

impl OtxConnector {
    /// Creates the connector. Requires `api_key` in the config; the
    /// registry treats a missing key as "disabled" before ever calling
    /// this.
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| FeedError::config("otx requires an api_key"))?;

        let mut headers = HeaderMap::new();
        let mut key_value = HeaderValue::from_str(api_key.expose_secret())
            .map_err(|e| FeedError::config(format!("invalid otx api_key: {e}")))?;
        key_value.set_sensitive(true);
        headers.insert("X-OTX-API-KEY", key_value);

        let client = HttpClient::with_headers(&config, headers)?;
        Ok(Self { config, client })
    }

    fn page_path(cursor: Option<&Cursor>, page: u32) -> String {
        match cursor {
            Some(c) => format!(
                "/api/v1/pulses/subscribed?modified_since={}&page={}",
                c.as_str(),
                page
            ),
            None => format!("/api/v1/pulses/subscribed?page={}", page),
        }
    }
}

#[async_trait]
impl FeedConnector for OtxConnector {
    fn source(&self) -> FeedSource {
        FeedSource::Otx
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch> {
        let fetched_at = Utc::now();
        let mut records = Vec::new();
        let mut newest_modified: Option<String> = cursor.map(|c| c.as_str().to_string());

        for page in 1..=MAX_PAGES_PER_POLL {
            let path = Self::page_path(cursor, page);
            let response: SubscribedPage = self.client.get_json(&path).await?;

            for pulse in response.results {
                if let Some(modified) = pulse_modified(&pulse) {
                    if newest_modified.as_deref().map_or(true, |n| modified > n) {
                        newest_modified = Some(modified.to_string());
                    }
                }
                records.push(RawRecord::new(FeedSource::Otx, pulse, fetched_at));
            }

            if response.next.is_none() {
                break;
            }
        }

        debug!(
            pulses = records.len(),
            cursor = newest_modified.as_deref().unwrap_or("none"),
            "otx poll complete"
        );

        Ok(FeedBatch::new(records, newest_modified.map(Cursor::new)))
    }
}

/// The pulse timestamp the cursor tracks: `modified`, falling back to
/// `created` for providers that omit it.
fn pulse_modified(pulse: &serde_json::Value) -> Option<&str> {
    pulse
        .get("modified")
        .and_then(|v| v.as_str())
        .or_else(|| pulse.get("created").and_then(|v| v.as_str()))
}

#[derive(Debug, Deserialize)]
struct SubscribedPage {
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_config() -> FeedConfig {
        FeedConfig::new("https://otx.alienvault.com").with_api_key("test-key")
    }

    #[test]
    fn test_requires_api_key() {
        let config = FeedConfig::new("https://otx.alienvault.com");
        assert!(matches!(
            OtxConnector::new(config),
            Err(FeedError::Config(_))
        ));
        assert!(OtxConnector::new(create_test_config()).is_ok());
    }

    #[test]
    fn test_page_path_carries_cursor() {
        let cursor = Cursor::new("2024-05-01T12:00:00");
        assert_eq!(
            OtxConnector::page_path(Some(&cursor), 2),
            "/api/v1/pulses/subscribed?modified_since=2024-05-01T12:00:00&page=2"
        );
        assert_eq!(
            OtxConnector::page_path(None, 1),
            "/api/v1/pulses/subscribed?page=1"
        );
    }

    #[test]
    fn test_pulse_modified_falls_back_to_created() {
        let with_modified = json!({"modified": "2024-05-02T00:00:00", "created": "2024-05-01T00:00:00"});
        assert_eq!(pulse_modified(&with_modified), Some("2024-05-02T00:00:00"));

        let created_only = json!({"created": "2024-05-01T00:00:00"});
        assert_eq!(pulse_modified(&created_only), Some("2024-05-01T00:00:00"));

        assert_eq!(pulse_modified(&json!({"name": "x"})), None);
    }

    #[test]
    fn test_page_deserializes_with_missing_fields() {
        let page: SubscribedPage = serde_json::from_value(json!({})).unwrap();
        assert!(page.results.is_empty());
        assert!(page.next.is_none());

        let page: SubscribedPage = serde_json::from_value(json!({
            "results": [{"name": "Pulse A", "modified": "2024-05-01T00:00:00"}],
            "next": "https://otx.alienvault.com/api/v1/pulses/subscribed?page=2"
        }))
        .unwrap();
        assert_eq!(page.results.len(), 1);
        assert!(page.next.is_some());
    }
}
