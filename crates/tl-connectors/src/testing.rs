//! Test doubles for the feed connector contract.
//!
//! Used by this crate's own tests and by the pipeline crate's scheduler
//! tests; not compiled into release paths of the binary.

use crate::traits::{Cursor, FeedBatch, FeedConnector, FeedResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tl_core::{FeedSource, RawRecord};
use tokio::sync::Mutex;

/// Scripted feed connector: each poll pops the next queued outcome.
///
/// When the script runs dry, polls return an empty batch carrying the
/// caller's cursor forward, like an idle snapshot feed.
pub struct MockFeedConnector {
    source: FeedSource,
    poll_interval: Duration,
    script: Arc<Mutex<VecDeque<FeedResult<FeedBatch>>>>,
    observed_cursors: Arc<Mutex<Vec<Option<Cursor>>>>,
}

impl MockFeedConnector {
    pub fn new(source: FeedSource) -> Self {
        Self {
            source,
            poll_interval: Duration::from_millis(10),
            script: Arc::new(Mutex::new(VecDeque::new())),
            observed_cursors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Queues a successful batch for a future poll.
    pub async fn push_batch(&self, records: Vec<RawRecord>, next_cursor: Option<Cursor>) {
        self.script
            .lock()
            .await
            .push_back(Ok(FeedBatch::new(records, next_cursor)));
    }

    /// Queues an error for a future poll.
    pub async fn push_error(&self, error: crate::FeedError) {
        self.script.lock().await.push_back(Err(error));
    }

    /// Number of polls issued so far.
    pub async fn poll_count(&self) -> usize {
        self.observed_cursors.lock().await.len()
    }

    /// The cursor argument of each poll, in order.
    pub async fn observed_cursors(&self) -> Vec<Option<Cursor>> {
        self.observed_cursors.lock().await.clone()
    }
}

#[async_trait]
impl FeedConnector for MockFeedConnector {
    fn source(&self) -> FeedSource {
        self.source
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll(&self, cursor: Option<&Cursor>) -> FeedResult<FeedBatch> {
        self.observed_cursors.lock().await.push(cursor.cloned());

        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => Ok(FeedBatch::new(Vec::new(), cursor.cloned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FeedError;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let mock = MockFeedConnector::new(FeedSource::Feodo);
        let record = RawRecord::new(FeedSource::Feodo, json!({"ip": "1.2.3.4"}), Utc::now());
        mock.push_batch(vec![record], Some(Cursor::new("c1"))).await;
        mock.push_error(FeedError::rate_limited(30)).await;

        let batch = mock.poll(None).await.unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.next_cursor.unwrap().as_str(), "c1");

        let err = mock.poll(Some(&Cursor::new("c1"))).await.unwrap_err();
        assert!(matches!(err, FeedError::RateLimited { .. }));

        // Script exhausted: empty batch, cursor carried forward.
        let idle = mock.poll(Some(&Cursor::new("c1"))).await.unwrap();
        assert!(idle.is_empty());
        assert_eq!(idle.next_cursor.unwrap().as_str(), "c1");
    }

    #[tokio::test]
    async fn test_records_observed_cursors() {
        let mock = MockFeedConnector::new(FeedSource::Otx);
        mock.poll(None).await.unwrap();
        mock.poll(Some(&Cursor::new("t1"))).await.unwrap();

        assert_eq!(mock.poll_count().await, 2);
        let cursors = mock.observed_cursors().await;
        assert!(cursors[0].is_none());
        assert_eq!(cursors[1].as_ref().unwrap().as_str(), "t1");
    }
}
