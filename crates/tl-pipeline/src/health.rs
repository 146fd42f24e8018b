//! Feed health registry.
//!
//! The ingest scheduler writes feed status transitions here; the admin
//! surface reads snapshots. Kept separate from metrics so health is
//! queryable in-process without scraping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tl_connectors::FeedHealth;
use tl_core::FeedSource;
use tokio::sync::RwLock;

/// Current status and recency bookkeeping for one feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedHealthRecord {
    pub status: FeedHealth,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl FeedHealthRecord {
    fn new(status: FeedHealth) -> Self {
        Self {
            status,
            last_success_at: None,
            last_error_at: None,
            last_error: None,
        }
    }
}

/// Shared feed name → health mapping. Cheap to clone.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    feeds: Arc<RwLock<HashMap<FeedSource, FeedHealthRecord>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_healthy(&self, source: FeedSource) {
        let mut feeds = self.feeds.write().await;
        let record = feeds
            .entry(source)
            .or_insert_with(|| FeedHealthRecord::new(FeedHealth::Healthy));
        record.status = FeedHealth::Healthy;
        record.last_success_at = Some(Utc::now());
    }

    pub async fn mark_error(&self, source: FeedSource, reason: &str) {
        let mut feeds = self.feeds.write().await;
        let record = feeds
            .entry(source)
            .or_insert_with(|| FeedHealthRecord::new(FeedHealth::Healthy));
        record.last_error_at = Some(Utc::now());
        record.last_error = Some(reason.to_string());
    }

    /// Marks a feed stale after its retry budget is spent. Keeps the
    /// last error timestamps.
    pub async fn mark_degraded(&self, source: FeedSource, reason: &str) {
        let mut feeds = self.feeds.write().await;
        let record = feeds
            .entry(source)
            .or_insert_with(|| FeedHealthRecord::new(FeedHealth::Healthy));
        record.status = FeedHealth::Degraded(reason.to_string());
        record.last_error_at = Some(Utc::now());
        record.last_error = Some(reason.to_string());
    }

    pub async fn mark_auth_failed(&self, source: FeedSource) {
        let mut feeds = self.feeds.write().await;
        let record = feeds
            .entry(source)
            .or_insert_with(|| FeedHealthRecord::new(FeedHealth::AuthFailed));
        record.status = FeedHealth::AuthFailed;
        record.last_error_at = Some(Utc::now());
    }

    pub async fn mark_disabled(&self, source: FeedSource, reason: &str) {
        let mut feeds = self.feeds.write().await;
        let mut record = FeedHealthRecord::new(FeedHealth::Disabled);
        record.last_error = Some(reason.to_string());
        feeds.insert(source, record);
    }

    pub async fn status(&self, source: FeedSource) -> Option<FeedHealth> {
        self.feeds
            .read()
            .await
            .get(&source)
            .map(|r| r.status.clone())
    }

    /// Point-in-time copy of every tracked feed.
    pub async fn snapshot(&self) -> HashMap<FeedSource, FeedHealthRecord> {
        self.feeds.read().await.clone()
    }
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRegistry").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_degraded_keeps_reason_and_error_time() {
        let registry = HealthRegistry::new();
        registry.mark_degraded(FeedSource::Otx, "5 consecutive failures").await;

        let record = registry.snapshot().await[&FeedSource::Otx].clone();
        assert_eq!(
            record.status,
            FeedHealth::Degraded("5 consecutive failures".into())
        );
        assert!(record.last_error_at.is_some());
    }

    #[tokio::test]
    async fn test_recovery_clears_degraded_but_keeps_history() {
        let registry = HealthRegistry::new();
        registry.mark_degraded(FeedSource::Feodo, "timeout").await;
        registry.mark_healthy(FeedSource::Feodo).await;

        let record = registry.snapshot().await[&FeedSource::Feodo].clone();
        assert_eq!(record.status, FeedHealth::Healthy);
        assert!(record.last_success_at.is_some());
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_feeds_tracked_independently() {
        let registry = HealthRegistry::new();
        registry.mark_auth_failed(FeedSource::Otx).await;
        registry.mark_disabled(FeedSource::Urlhaus, "not configured").await;
        registry.mark_healthy(FeedSource::Sslbl).await;

        assert_eq!(
            registry.status(FeedSource::Otx).await,
            Some(FeedHealth::AuthFailed)
        );
        assert_eq!(
            registry.status(FeedSource::Urlhaus).await,
            Some(FeedHealth::Disabled)
        );
        assert_eq!(
            registry.status(FeedSource::Sslbl).await,
            Some(FeedHealth::Healthy)
        );
        assert!(registry.status(FeedSource::Feodo).await.is_none());
    }
}
