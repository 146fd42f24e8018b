//! abuse.ch SSL Blacklist connector.
//!
//! CSV snapshot of blacklisted certificate fingerprints:
//! `listing_date,sha1,listing_reason` rows with `#` comments. No
//! authentication; digest cursor like the other snapshot feeds.

use crate::feeds::snapshot_cursor;
use crate::http::HttpClient;
use crate::traits::{Cursor, FeedBatch, FeedConfig, FeedConnector, FeedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tl_core::{FeedSource, RawRecord};
use tracing::{debug, warn};

const BLACKLIST_PATH: &str = "/blacklist/sslblacklist.csv";

/// SSL Blacklist connector.
pub struct SslblConnector {
    config: FeedConfig,
    client: HttpClient,
}

impl SslblConnector {
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        let client = HttpClient::new(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl FeedConnector for SslblConnector {
    fn source(&self) -> FeedSource {
        FeedSource::Sslbl
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch> {
        let body = self.client.get_text(BLACKLIST_PATH).await?;
        let digest = snapshot_cursor(&body);

        if cursor == Some(&digest) {
            debug!("sslbl snapshot unchanged");
            return Ok(FeedBatch::unchanged(digest));
        }

        let records = parse_blacklist(&body, Utc::now());
        debug!(fingerprints = records.len(), "sslbl snapshot parsed");
        Ok(FeedBatch::new(records, Some(digest)))
    }
}

fn parse_blacklist(body: &str, fetched_at: DateTime<Utc>) -> Vec<RawRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "skipping malformed sslbl row");
                continue;
            }
        };
        let (Some(listing_date), Some(sha1)) = (row.get(0), row.get(1)) else {
            continue;
        };
        if sha1.is_empty() {
            continue;
        }
        records.push(RawRecord::new(
            FeedSource::Sslbl,
            json!({
                "sha1": sha1,
                "listing_date": listing_date,
                "listing_reason": row.get(2).unwrap_or(""),
            }),
            fetched_at,
        ));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
################################
# SSLBL SSL Certificate Blacklist
# Listingdate,SHA1,Listingreason
################################
2024-04-30 07:15:09,5fbcd54233338c2d8e0e1cf1ca5d55dac8a38e10,TrickBot C&C
2024-04-29 12:03:41,ab8e1f8da423cb71e107b4decb7a2a29f51d34b2,Gozi C&C
";

    #[test]
    fn test_parse_rows() {
        let records = parse_blacklist(SAMPLE, Utc::now());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].payload["sha1"],
            "5fbcd54233338c2d8e0e1cf1ca5d55dac8a38e10"
        );
        assert_eq!(records[0].payload["listing_reason"], "TrickBot C&C");
        assert_eq!(records[1].payload["listing_date"], "2024-04-29 12:03:41");
    }

    #[test]
    fn test_parse_skips_short_rows() {
        let records = parse_blacklist("2024-04-30 07:15:09\n", Utc::now());
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_comment_only_body() {
        assert!(parse_blacklist("# nothing here\n", Utc::now()).is_empty());
    }
}
