//! Seen-record cache for snapshot feeds.
//!
//! Snapshot feeds re-serve the same rows on every poll even when the
//! content digest changes (one new row changes the digest, the other
//! thousand rows are old). A TTL-bounded cache over each record's
//! content fingerprint keeps already-seen rows off the event log.
//! Running without the cache is safe, just noisy: the downstream merge
//! is idempotent.

use moka::future::Cache;
use std::time::Duration;
use tl_core::RawRecord;

/// TTL-bounded cache of raw-record fingerprints.
pub struct DedupeCache {
    seen: Cache<String, ()>,
}

impl DedupeCache {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    /// Returns true the first time a record's fingerprint is seen within
    /// the TTL window, marking it as seen.
    pub async fn first_seen(&self, record: &RawRecord) -> bool {
        let fingerprint = record.fingerprint();
        if self.seen.get(&fingerprint).await.is_some() {
            return false;
        }
        self.seen.insert(fingerprint, ()).await;
        true
    }

    /// Drops already-seen records from a batch, keeping input order.
    pub async fn filter_new(&self, records: Vec<RawRecord>) -> Vec<RawRecord> {
        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            if self.first_seen(&record).await {
                fresh.push(record);
            }
        }
        fresh
    }

    /// Number of fingerprints currently cached. Approximate, for tests
    /// and diagnostics.
    pub async fn entry_count(&self) -> u64 {
        self.seen.run_pending_tasks().await;
        self.seen.entry_count()
    }
}
