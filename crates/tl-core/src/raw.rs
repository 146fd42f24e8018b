//! Raw provider records as fetched from feeds.
//!
//! Connectors decode transport formats (JSON pages, plain-text blocklists,
//! CSV rows) into a [`RawRecord`] carrying the source tag and a JSON
//! payload. The payload is only given meaning at the normalizer boundary,
//! where it is parsed into one of the known per-source shapes below; a
//! payload matching none of them is a validation failure, never a silent
//! pass-through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The feeds the pipeline knows how to normalize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Otx,
    Feodo,
    Sslbl,
    Urlhaus,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::Otx => "otx",
            FeedSource::Feodo => "feodo",
            FeedSource::Sslbl => "sslbl",
            FeedSource::Urlhaus => "urlhaus",
        }
    }

    /// All sources, in registry order.
    pub fn all() -> [FeedSource; 4] {
        [
            FeedSource::Otx,
            FeedSource::Feodo,
            FeedSource::Sslbl,
            FeedSource::Urlhaus,
        ]
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeedSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "otx" => Ok(FeedSource::Otx),
            "feodo" => Ok(FeedSource::Feodo),
            "sslbl" => Ok(FeedSource::Sslbl),
            "urlhaus" => Ok(FeedSource::Urlhaus),
            other => Err(format!("unknown feed source: {}", other)),
        }
    }
}

/// One record as emitted by a connector poll or the admin seed path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    /// Feed the record came from.
    pub source: FeedSource,
    /// Provider payload, shape-checked by the normalizer.
    pub payload: serde_json::Value,
    /// When the connector fetched the record. Used as the observation
    /// fallback when the payload carries no timestamp of its own.
    pub fetched_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(source: FeedSource, payload: serde_json::Value, fetched_at: DateTime<Utc>) -> Self {
        Self {
            source,
            payload,
            fetched_at,
        }
    }

    /// Content fingerprint over source and payload, used by the seen-record
    /// cache to suppress re-publication of identical snapshot rows.
    ///
    /// `fetched_at` is deliberately excluded: the same row fetched twice
    /// must fingerprint the same.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_str().as_bytes());
        hasher.update([0u8]);
        // serde_json sorts object keys, so this is canonical.
        hasher.update(self.payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

// Known raw shapes, one module-level set per source. Unknown fields are
// ignored; a payload that deserializes into none of a source's shapes is
// rejected by the normalizer.

/// AlienVault OTX payloads: either a full pulse or the compact sighting
/// shape used by seeding and co-occurrence tests.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OtxRecord {
    Pulse(OtxPulse),
    Sighting(OtxSighting),
}

/// A pulse: one provider threat report bundling indicators and metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct OtxPulse {
    pub name: String,
    #[serde(default)]
    pub adversary: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub indicators: Vec<OtxPulseIndicator>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtxPulseIndicator {
    #[serde(rename = "type")]
    pub kind: String,
    pub indicator: String,
    #[serde(default)]
    pub created: Option<String>,
}

/// Compact co-occurrence form: one indicator plus the campaign and actor it
/// was sighted with.
#[derive(Debug, Clone, Deserialize)]
pub struct OtxSighting {
    pub ip: String,
    pub pulse: String,
    pub actor: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Feodo Tracker botnet C2 blocklist row.
#[derive(Debug, Clone, Deserialize)]
pub struct FeodoRecord {
    pub ip: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// SSL Blacklist row: a certificate fingerprint with its listing reason.
#[derive(Debug, Clone, Deserialize)]
pub struct SslblRecord {
    pub sha1: String,
    #[serde(default)]
    pub listing_date: Option<String>,
    #[serde(default)]
    pub listing_reason: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// URLhaus recent-URLs row.
#[derive(Debug, Clone, Deserialize)]
pub struct UrlhausRecord {
    pub url: String,
    #[serde(default)]
    pub dateadded: Option<String>,
    #[serde(default)]
    pub threat: Option<String>,
    #[serde(default)]
    pub url_status: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_otx_payload_disambiguation() {
        let pulse: OtxRecord = serde_json::from_value(json!({
            "name": "Test Threat Pulse",
            "adversary": "NoisyBear",
            "indicators": [{"type": "IPv4", "indicator": "1.2.3.4"}]
        }))
        .unwrap();
        assert!(matches!(pulse, OtxRecord::Pulse(_)));

        let sighting: OtxRecord = serde_json::from_value(json!({
            "ip": "1.2.3.4",
            "pulse": "OpBarrel",
            "actor": "NoisyBear"
        }))
        .unwrap();
        assert!(matches!(sighting, OtxRecord::Sighting(_)));
    }

    #[test]
    fn test_unknown_shape_fails_to_parse() {
        let result: Result<OtxRecord, _> =
            serde_json::from_value(json!({"unexpected": "fields"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_fingerprint_ignores_fetch_time() {
        let payload = json!({"ip": "1.2.3.4"});
        let a = RawRecord::new(FeedSource::Feodo, payload.clone(), Utc::now());
        let b = RawRecord::new(
            FeedSource::Feodo,
            payload,
            Utc::now() + chrono::Duration::hours(1),
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_sources() {
        let payload = serde_json::json!({"ip": "1.2.3.4"});
        let a = RawRecord::new(FeedSource::Feodo, payload.clone(), Utc::now());
        let b = RawRecord::new(FeedSource::Otx, payload, a.fetched_at);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_source_round_trip() {
        for source in FeedSource::all() {
            assert_eq!(source.as_str().parse::<FeedSource>().unwrap(), source);
        }
    }
}
