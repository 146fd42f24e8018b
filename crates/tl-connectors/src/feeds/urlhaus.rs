//! abuse.ch URLhaus recent-URLs connector.
//!
//! CSV snapshot with quoted fields:
//! `id,dateadded,url,url_status,last_online,threat,tags,urlhaus_link,reporter`.
//! No authentication; digest cursor like the other snapshot feeds.

use crate::feeds::snapshot_cursor;
use crate::http::HttpClient;
use crate::traits::{Cursor, FeedBatch, FeedConfig, FeedConnector, FeedResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tl_core::{FeedSource, RawRecord};
use tracing::{debug, warn};

const RECENT_URLS_PATH: &str = "/downloads/csv_recent/";

/// URLhaus connector.
pub struct UrlhausConnector {
    config: FeedConfig,
    client: HttpClient,
}

impl UrlhausConnector {
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        let client = HttpClient::new(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl FeedConnector for UrlhausConnector {
    fn source(&self) -> FeedSource {
        FeedSource::Urlhaus
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch> {
        let body = self.client.get_text(RECENT_URLS_PATH).await?;
        let digest = snapshot_cursor(&body);

        if cursor == Some(&digest) {
            debug!("urlhaus snapshot unchanged");
            return Ok(FeedBatch::unchanged(digest));
        }

        let records = parse_recent_urls(&body, Utc::now());
        debug!(urls = records.len(), "urlhaus snapshot parsed");
        Ok(FeedBatch::new(records, Some(digest)))
    }
}

fn parse_recent_urls(body: &str, fetched_at: DateTime<Utc>) -> Vec<RawRecord> {
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
                warn!(error = %e, "skipping malformed urlhaus row");
                continue;
            }
        };
        let Some(url) = row.get(2) else { continue };
        if url.is_empty() {
            continue;
        }
        records.push(RawRecord::new(
            FeedSource::Urlhaus,
            json!({
                "url": url,
                "dateadded": row.get(1).unwrap_or(""),
                "url_status": row.get(3).unwrap_or(""),
                "threat": row.get(5).unwrap_or(""),
            }),
            fetched_at,
        ));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"################################
# URLhaus recent URLs
# id,dateadded,url,url_status,last_online,threat,tags,urlhaus_link,reporter
################################
"2912210","2024-05-01 06:22:04","http://117.197.96.178:42197/bin.sh","online","2024-05-01 06:22:04","malware_download","32-bit,elf,mips","https://urlhaus.abuse.ch/url/2912210/","geenensp"
"2912209","2024-05-01 06:21:31","http://bad.example.com/payload, with comma.exe","offline","","malware_download","exe","https://urlhaus.abuse.ch/url/2912209/","anonymous"
"#;

    #[test]
    fn test_parse_rows_including_quoted_commas() {
        let records = parse_recent_urls(SAMPLE, Utc::now());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].payload["url"],
            "http://117.197.96.178:42197/bin.sh"
        );
        assert_eq!(records[0].payload["url_status"], "online");
        assert_eq!(records[0].payload["threat"], "malware_download");
        // The quoted comma stays inside one field.
        assert_eq!(
            records[1].payload["url"],
            "http://bad.example.com/payload, with comma.exe"
        );
    }

    #[test]
    fn test_parse_skips_rows_without_url() {
        assert!(parse_recent_urls("\"1\",\"2024-05-01\"\n", Utc::now()).is_empty());
        assert!(parse_recent_urls("# comments only\n", Utc::now()).is_empty());
    }
}
