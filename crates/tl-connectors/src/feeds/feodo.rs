//! abuse.ch Feodo Tracker botnet C2 blocklist connector.
//!
//! Plain-text snapshot, one IP per line, `#` comment lines skipped.
//! No authentication. The cursor is a digest of the whole body; an
//! unchanged snapshot emits nothing.

use crate::feeds::snapshot_cursor;
use crate::http::HttpClient;
use crate::traits::{Cursor, FeedBatch, FeedConfig, FeedConnector, FeedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tl_core::{FeedSource, RawRecord};
use tracing::debug;

const BLOCKLIST_PATH: &str = "/downloads/ipblocklist.txt";

/// Feodo Tracker connector.
pub struct FeodoConnector {
    config: FeedConfig,
    client: HttpClient,
}

impl FeodoConnector {
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        let client = HttpClient::new(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl FeedConnector for FeodoConnector {
    fn source(&self) -> FeedSource {
        FeedSource::Feodo
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch> {
        let body = self.client.get_text(BLOCKLIST_PATH).await?;
        let digest = snapshot_cursor(&body);

        if cursor == Some(&digest) {
            debug!("feodo snapshot unchanged");
            return Ok(FeedBatch::unchanged(digest));
        }

        let records = parse_blocklist(&body, Utc::now());
        debug!(ips = records.len(), "feodo snapshot parsed");
        Ok(FeedBatch::new(records, Some(digest)))
    }
}

fn parse_blocklist(body: &str, fetched_at: DateTime<Utc>) -> Vec<RawRecord> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|ip| RawRecord::new(FeedSource::Feodo, json!({ "ip": ip }), fetched_at))
        .collect()
}
