//! Normalization of raw feed records into canonical entities and
//! relationships.
//!
//! Normalization is pure and deterministic: identical raw input always
//! yields identical output, which is what makes downstream at-least-once
//! redelivery safe. Malformed records fail with [`NormalizeError`] and are
//! dropped by the caller; they never reach the event log.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

use crate::models::{
    Campaign, Entity, Indicator, IndicatorCategory, IndicatorKind, Relationship,
    RelationshipType, ThreatActor,
};
use crate::raw::{
    FeedSource, FeodoRecord, OtxPulse, OtxRecord, OtxSighting, RawRecord, SslblRecord,
    UrlhausRecord,
};

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+$")
        .expect("domain regex")
});

static HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-f0-9]{32}|[a-f0-9]{40}|[a-f0-9]{64})$").expect("hash regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

static CVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CVE-\d{4}-\d{4,}$").expect("cve regex"));

/// Why a raw record could not be normalized.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Unrecognized {feed} record shape: {detail}")]
    UnknownShape { feed: FeedSource, detail: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid {kind} value: {value}")]
    InvalidValue { kind: IndicatorKind, value: String },

    #[error("Confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Unparsable timestamp: {0}")]
    InvalidTimestamp(String),
}

impl NormalizeError {
    pub fn unknown_shape(source: FeedSource, detail: impl Into<String>) -> Self {
        Self::UnknownShape {
            feed: source,
            detail: detail.into(),
        }
    }

    pub fn invalid_value(kind: IndicatorKind, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind,
            value: value.into(),
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownShape { .. } => "unknown_shape",
            Self::MissingField(_) => "missing_field",
            Self::InvalidValue { .. } => "invalid_value",
            Self::ConfidenceOutOfRange(_) => "confidence_out_of_range",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
        }
    }
}

pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Canonical output of normalizing a single raw record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Maps raw provider records to the canonical model.
///
/// Holds only per-source default confidences; no I/O, no clock.
#[derive(Debug, Clone)]
pub struct Normalizer {
    defaults: HashMap<FeedSource, f64>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Creates a normalizer with the stock per-source default confidences:
    /// community-sourced pulses rank below curated blocklists.
    pub fn new() -> Self {
        let mut defaults = HashMap::new();
        defaults.insert(FeedSource::Otx, 0.6);
        defaults.insert(FeedSource::Feodo, 0.9);
        defaults.insert(FeedSource::Sslbl, 0.9);
        defaults.insert(FeedSource::Urlhaus, 0.8);
        Self { defaults }
    }

    /// Overrides the default confidence for one source.
    pub fn with_default_confidence(mut self, source: FeedSource, confidence: f64) -> Self {
        self.defaults.insert(source, confidence.clamp(0.0, 1.0));
        self
    }

    /// Normalizes one raw record into entities and relationships.
    pub fn normalize(&self, record: &RawRecord) -> NormalizeResult<Normalized> {
        match record.source {
            FeedSource::Otx => self.normalize_otx(record),
            FeedSource::Feodo => self.normalize_feodo(record),
            FeedSource::Sslbl => self.normalize_sslbl(record),
            FeedSource::Urlhaus => self.normalize_urlhaus(record),
        }
    }

    fn default_for(&self, source: FeedSource) -> f64 {
        self.defaults.get(&source).copied().unwrap_or(0.5)
    }

    fn normalize_otx(&self, record: &RawRecord) -> NormalizeResult<Normalized> {
        let parsed: OtxRecord = serde_json::from_value(record.payload.clone())
            .map_err(|e| NormalizeError::unknown_shape(FeedSource::Otx, e.to_string()))?;

        match parsed {
            OtxRecord::Pulse(pulse) => self.normalize_pulse(&pulse, record.fetched_at),
            OtxRecord::Sighting(sighting) => self.normalize_sighting(&sighting, record.fetched_at),
        }
    }

    /// Compact co-occurrence form: one IP sighted with the campaign and
    /// actor it was reported under. Yields exactly the indicator, actor,
    /// campaign, and the two attribution edges.
    fn normalize_sighting(
        &self,
        sighting: &OtxSighting,
        fetched_at: DateTime<Utc>,
    ) -> NormalizeResult<Normalized> {
        if sighting.pulse.trim().is_empty() {
            return Err(NormalizeError::MissingField("pulse".into()));
        }
        if sighting.actor.trim().is_empty() {
            return Err(NormalizeError::MissingField("actor".into()));
        }

        let source = FeedSource::Otx;
        let confidence = resolve_confidence(sighting.confidence, self.default_for(source))?;
        let value = validate_value(IndicatorKind::Ip, &sighting.ip)?;

        let indicator = Indicator::new(
            IndicatorKind::Ip,
            value,
            IndicatorCategory::AttackInfrastructure,
            confidence,
            source.as_str(),
            fetched_at,
        );
        let actor = ThreatActor::new(sighting.actor.trim(), confidence, source.as_str(), fetched_at);
        let campaign = Campaign::new(sighting.pulse.trim(), confidence, source.as_str(), fetched_at);

        let used_by = Relationship::new(
            indicator.id.clone(),
            actor.id.clone(),
            RelationshipType::UsedBy,
            confidence,
            fetched_at,
        );
        let belongs_to = Relationship::new(
            actor.id.clone(),
            campaign.id.clone(),
            RelationshipType::BelongsTo,
            confidence,
            fetched_at,
        );

        Ok(Normalized {
            entities: vec![indicator.into(), actor.into(), campaign.into()],
            relationships: vec![used_by, belongs_to],
        })
    }

    fn normalize_pulse(
        &self,
        pulse: &OtxPulse,
        fetched_at: DateTime<Utc>,
    ) -> NormalizeResult<Normalized> {
        if pulse.name.trim().is_empty() {
            return Err(NormalizeError::MissingField("name".into()));
        }

        let source = FeedSource::Otx;
        let confidence = resolve_confidence(pulse.confidence, self.default_for(source))?;

        let first_seen = match &pulse.created {
            Some(ts) => parse_feed_timestamp(ts)?,
            None => fetched_at,
        };
        let last_seen = match &pulse.modified {
            Some(ts) => parse_feed_timestamp(ts)?,
            None => first_seen,
        };
        let (first_seen, last_seen) = (first_seen.min(last_seen), last_seen.max(first_seen));

        let campaign = Campaign::new(pulse.name.trim(), confidence, source.as_str(), last_seen)
            .with_objectives(pulse.tags.iter().map(|t| t.trim().to_string()))
            .with_seen_range(first_seen, last_seen);

        let actor = pulse
            .adversary
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|name| {
                ThreatActor::new(name, confidence, source.as_str(), last_seen)
                    .with_seen_range(first_seen, last_seen)
            });

        let mut entities: Vec<Entity> = Vec::new();
        let mut relationships = Vec::new();

        for raw_indicator in &pulse.indicators {
            // Pulses routinely carry indicator types outside the canonical
            // set (YARA rules, mutexes); those are skipped, not fatal.
            let Some(kind) = map_otx_indicator_kind(&raw_indicator.kind) else {
                continue;
            };
            let value = validate_value(kind, &raw_indicator.indicator)?;
            let observed = match &raw_indicator.created {
                Some(ts) => parse_feed_timestamp(ts)?,
                None => last_seen,
            };

            let indicator = Indicator::new(
                kind,
                value,
                IndicatorCategory::AttackInfrastructure,
                confidence,
                source.as_str(),
                observed,
            );

            if let Some(actor) = &actor {
                relationships.push(Relationship::new(
                    indicator.id.clone(),
                    actor.id.clone(),
                    RelationshipType::UsedBy,
                    confidence,
                    observed,
                ));
            }
            relationships.push(Relationship::new(
                campaign.id.clone(),
                indicator.id.clone(),
                RelationshipType::Involves,
                confidence,
                observed,
            ));
            entities.push(indicator.into());
        }

        if let Some(actor) = actor {
            relationships.push(Relationship::new(
                actor.id.clone(),
                campaign.id.clone(),
                RelationshipType::BelongsTo,
                confidence,
                last_seen,
            ));
            entities.push(actor.into());
        }
        entities.push(campaign.into());

        Ok(Normalized {
            entities,
            relationships,
        })
    }

    fn normalize_feodo(&self, record: &RawRecord) -> NormalizeResult<Normalized> {
        let parsed: FeodoRecord = serde_json::from_value(record.payload.clone())
            .map_err(|e| NormalizeError::unknown_shape(FeedSource::Feodo, e.to_string()))?;

        let source = FeedSource::Feodo;
        let confidence = resolve_confidence(parsed.confidence, self.default_for(source))?;
        let value = validate_value(IndicatorKind::Ip, &parsed.ip)?;

        let indicator = Indicator::new(
            IndicatorKind::Ip,
            value,
            IndicatorCategory::CommandAndControl,
            confidence,
            source.as_str(),
            record.fetched_at,
        );

        Ok(Normalized {
            entities: vec![indicator.into()],
            relationships: Vec::new(),
        })
    }

    fn normalize_sslbl(&self, record: &RawRecord) -> NormalizeResult<Normalized> {
        let parsed: SslblRecord = serde_json::from_value(record.payload.clone())
            .map_err(|e| NormalizeError::unknown_shape(FeedSource::Sslbl, e.to_string()))?;

        let source = FeedSource::Sslbl;
        let confidence = resolve_confidence(parsed.confidence, self.default_for(source))?;
        let value = validate_value(IndicatorKind::Hash, &parsed.sha1)?;
        let observed = match &parsed.listing_date {
            Some(ts) => parse_feed_timestamp(ts)?,
            None => record.fetched_at,
        };

        let category = match parsed.listing_reason.as_deref() {
            Some(reason) if reason.to_lowercase().contains("c&c") => {
                IndicatorCategory::CommandAndControl
            }
            _ => IndicatorCategory::Malware,
        };

        let indicator = Indicator::new(
            IndicatorKind::Hash,
            value,
            category,
            confidence,
            source.as_str(),
            observed,
        );

        Ok(Normalized {
            entities: vec![indicator.into()],
            relationships: Vec::new(),
        })
    }

    fn normalize_urlhaus(&self, record: &RawRecord) -> NormalizeResult<Normalized> {
        let parsed: UrlhausRecord = serde_json::from_value(record.payload.clone())
            .map_err(|e| NormalizeError::unknown_shape(FeedSource::Urlhaus, e.to_string()))?;

        let source = FeedSource::Urlhaus;
        let confidence = resolve_confidence(parsed.confidence, self.default_for(source))?;
        let value = validate_value(IndicatorKind::Url, &parsed.url)?;
        let observed = match &parsed.dateadded {
            Some(ts) => parse_feed_timestamp(ts)?,
            None => record.fetched_at,
        };

        let category = match parsed.threat.as_deref() {
            Some("phishing") => IndicatorCategory::Phishing,
            _ => IndicatorCategory::Malware,
        };

        let url_indicator = Indicator::new(
            IndicatorKind::Url,
            value.clone(),
            category,
            confidence,
            source.as_str(),
            observed,
        );

        let mut entities: Vec<Entity> = Vec::new();
        let mut relationships = Vec::new();

        // The URL's host is itself an indicator: an IP host gets a
        // RESOLVES_TO edge, a domain host an ASSOCIATED_WITH edge.
        if let Some(host) = url_host(&value) {
            let (kind, rel_type) = if host.parse::<IpAddr>().is_ok() {
                (IndicatorKind::Ip, RelationshipType::ResolvesTo)
            } else {
                (IndicatorKind::Domain, RelationshipType::AssociatedWith)
            };
            if let Ok(host_value) = validate_value(kind, &host) {
                let host_indicator = Indicator::new(
                    kind,
                    host_value,
                    category,
                    confidence,
                    source.as_str(),
                    observed,
                );
                relationships.push(Relationship::new(
                    url_indicator.id.clone(),
                    host_indicator.id.clone(),
                    rel_type,
                    confidence,
                    observed,
                ));
                entities.push(host_indicator.into());
            }
        }

        entities.insert(0, url_indicator.into());

        Ok(Normalized {
            entities,
            relationships,
        })
    }
}

/// Maps an OTX indicator type string to a canonical kind, or `None` for
/// types outside the model.
fn map_otx_indicator_kind(raw: &str) -> Option<IndicatorKind> {
    match raw {
        "IPv4" | "IPv6" => Some(IndicatorKind::Ip),
        "domain" | "hostname" => Some(IndicatorKind::Domain),
        "URL" | "URI" => Some(IndicatorKind::Url),
        "FileHash-MD5" | "FileHash-SHA1" | "FileHash-SHA256" => Some(IndicatorKind::Hash),
        "email" | "EMAIL" => Some(IndicatorKind::Email),
        "CVE" => Some(IndicatorKind::Cve),
        _ => None,
    }
}

/// Validates and canonicalizes an indicator value for its kind.
pub fn validate_value(kind: IndicatorKind, value: &str) -> NormalizeResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NormalizeError::invalid_value(kind, value));
    }

    match kind {
        IndicatorKind::Ip => trimmed
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| NormalizeError::invalid_value(kind, trimmed)),
        IndicatorKind::Domain => {
            let lowered = trimmed.to_lowercase();
            if DOMAIN_RE.is_match(&lowered) {
                Ok(lowered)
            } else {
                Err(NormalizeError::invalid_value(kind, trimmed))
            }
        }
        IndicatorKind::Url => url::Url::parse(trimmed)
            .map(|u| u.to_string())
            .map_err(|_| NormalizeError::invalid_value(kind, trimmed)),
        IndicatorKind::Hash => {
            let lowered = trimmed.to_lowercase();
            if HASH_RE.is_match(&lowered) {
                Ok(lowered)
            } else {
                Err(NormalizeError::invalid_value(kind, trimmed))
            }
        }
        IndicatorKind::Email => {
            let lowered = trimmed.to_lowercase();
            if EMAIL_RE.is_match(&lowered) {
                Ok(lowered)
            } else {
                Err(NormalizeError::invalid_value(kind, trimmed))
            }
        }
        IndicatorKind::Cve => {
            let upper = trimmed.to_uppercase();
            if CVE_RE.is_match(&upper) {
                Ok(upper)
            } else {
                Err(NormalizeError::invalid_value(kind, trimmed))
            }
        }
    }
}

/// Extracts the host component of an already validated URL.
fn url_host(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_matches(|c| c == '[' || c == ']').to_string()))
}

/// Provider confidence if present and in range, else the source default.
/// A declared value outside [0, 1] is malformed, not defaulted.
fn resolve_confidence(provided: Option<f64>, default: f64) -> NormalizeResult<f64> {
    match provided {
        Some(c) if (0.0..=1.0).contains(&c) => Ok(c),
        Some(c) => Err(NormalizeError::ConfidenceOutOfRange(c)),
        None => Ok(default),
    }
}

/// Parses the timestamp formats seen across feeds: RFC 3339, naive
/// date-times with `T` or space separators, and bare dates.
pub fn parse_feed_timestamp(raw: &str) -> NormalizeResult<DateTime<Utc>> {
    let trimmed = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }

    Err(NormalizeError::InvalidTimestamp(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(source: FeedSource, payload: serde_json::Value) -> RawRecord {
        let fetched_at = "2025-06-01T12:00:00Z".parse().unwrap();
        RawRecord::new(source, payload, fetched_at)
    }

    #[test]
    fn test_sighting_yields_cooccurrence_graph() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Otx,
            json!({"ip": "1.2.3.4", "pulse": "OpBarrel", "actor": "NoisyBear"}),
        );

        let out = normalizer.normalize(&raw).unwrap();

        assert_eq!(out.entities.len(), 3);
        let keys: Vec<&str> = out.entities.iter().map(|e| e.key().as_str()).collect();
        assert!(keys.contains(&"indicator:ip:1.2.3.4"));
        assert!(keys.contains(&"actor:noisybear"));
        assert!(keys.contains(&"campaign:opbarrel"));

        assert_eq!(out.relationships.len(), 2);
        let used_by = &out.relationships[0];
        assert_eq!(used_by.kind, RelationshipType::UsedBy);
        assert_eq!(used_by.source_key.as_str(), "indicator:ip:1.2.3.4");
        assert_eq!(used_by.target_key.as_str(), "actor:noisybear");
        let belongs_to = &out.relationships[1];
        assert_eq!(belongs_to.kind, RelationshipType::BelongsTo);
        assert_eq!(belongs_to.source_key.as_str(), "actor:noisybear");
        assert_eq!(belongs_to.target_key.as_str(), "campaign:opbarrel");

        for entity in &out.entities {
            assert_eq!(entity.source(), "otx");
            assert_eq!(entity.confidence(), 0.6);
        }
    }

    #[test]
    fn test_pulse_with_indicators_and_adversary() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Otx,
            json!({
                "name": "Test Threat Pulse",
                "adversary": "NoisyBear",
                "created": "2025-05-01T00:00:00",
                "modified": "2025-05-02T00:00:00",
                "tags": ["banking", "trojan"],
                "indicators": [
                    {"type": "IPv4", "indicator": "9.8.7.6"},
                    {"type": "domain", "indicator": "Evil.Example"},
                    {"type": "YARA", "indicator": "rule x {}"}
                ]
            }),
        );

        let out = normalizer.normalize(&raw).unwrap();

        // 2 canonical indicators (YARA skipped) + actor + campaign.
        assert_eq!(out.entities.len(), 4);
        let keys: Vec<&str> = out.entities.iter().map(|e| e.key().as_str()).collect();
        assert!(keys.contains(&"indicator:domain:evil.example"));

        // USED_BY + INVOLVES per indicator, plus one BELONGS_TO.
        assert_eq!(out.relationships.len(), 5);
        assert_eq!(
            out.relationships
                .iter()
                .filter(|r| r.kind == RelationshipType::Involves)
                .count(),
            2
        );
    }

    #[test]
    fn test_pulse_without_name_is_rejected() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Otx,
            json!({"name": "", "indicators": []}),
        );
        let err = normalizer.normalize(&raw).unwrap_err();
        assert_eq!(err, NormalizeError::MissingField("name".into()));
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        let normalizer = Normalizer::new();
        let raw = record(FeedSource::Otx, json!({"surprise": true}));
        let err = normalizer.normalize(&raw).unwrap_err();
        assert_eq!(err.kind(), "unknown_shape");
    }

    #[test]
    fn test_out_of_range_confidence_is_rejected_not_defaulted() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Otx,
            json!({"ip": "1.2.3.4", "pulse": "P", "actor": "A", "confidence": 1.5}),
        );
        let err = normalizer.normalize(&raw).unwrap_err();
        assert_eq!(err, NormalizeError::ConfidenceOutOfRange(1.5));
    }

    #[test]
    fn test_invalid_ip_is_rejected() {
        let normalizer = Normalizer::new();
        let raw = record(FeedSource::Feodo, json!({"ip": "999.1.2.3"}));
        let err = normalizer.normalize(&raw).unwrap_err();
        assert_eq!(err.kind(), "invalid_value");
    }

    #[test]
    fn test_unparsable_timestamp_is_rejected() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Sslbl,
            json!({"sha1": "a".repeat(40), "listing_date": "not a date"}),
        );
        let err = normalizer.normalize(&raw).unwrap_err();
        assert_eq!(err.kind(), "invalid_timestamp");
    }

    #[test]
    fn test_feodo_line_becomes_c2_indicator() {
        let normalizer = Normalizer::new();
        let raw = record(FeedSource::Feodo, json!({"ip": "192.168.1.1"}));
        let out = normalizer.normalize(&raw).unwrap();

        assert_eq!(out.entities.len(), 1);
        assert!(out.relationships.is_empty());
        match &out.entities[0] {
            Entity::Indicator(ind) => {
                assert_eq!(ind.kind, IndicatorKind::Ip);
                assert_eq!(ind.category, IndicatorCategory::CommandAndControl);
                assert_eq!(ind.confidence, 0.9);
                assert_eq!(ind.first_seen, raw.fetched_at);
            }
            other => panic!("expected indicator, got {:?}", other),
        }
    }

    #[test]
    fn test_sslbl_listing_reason_drives_category() {
        let normalizer = Normalizer::new();
        let c2 = record(
            FeedSource::Sslbl,
            json!({"sha1": "b".repeat(40), "listing_reason": "Gozi C&C"}),
        );
        let out = normalizer.normalize(&c2).unwrap();
        match &out.entities[0] {
            Entity::Indicator(ind) => {
                assert_eq!(ind.category, IndicatorCategory::CommandAndControl);
            }
            other => panic!("expected indicator, got {:?}", other),
        }
    }

    #[test]
    fn test_urlhaus_ip_host_resolves_to() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Urlhaus,
            json!({
                "url": "http://203.0.113.7/payload.exe",
                "dateadded": "2025-01-01 10:00:05",
                "threat": "malware_download"
            }),
        );
        let out = normalizer.normalize(&raw).unwrap();

        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.relationships.len(), 1);
        let edge = &out.relationships[0];
        assert_eq!(edge.kind, RelationshipType::ResolvesTo);
        assert_eq!(edge.target_key.as_str(), "indicator:ip:203.0.113.7");
    }

    #[test]
    fn test_urlhaus_domain_host_associated_with() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Urlhaus,
            json!({"url": "http://malicious.example/x", "threat": "phishing"}),
        );
        let out = normalizer.normalize(&raw).unwrap();

        let edge = &out.relationships[0];
        assert_eq!(edge.kind, RelationshipType::AssociatedWith);
        assert_eq!(edge.target_key.as_str(), "indicator:domain:malicious.example");
        match &out.entities[0] {
            Entity::Indicator(ind) => assert_eq!(ind.category, IndicatorCategory::Phishing),
            other => panic!("expected indicator, got {:?}", other),
        }
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let normalizer = Normalizer::new();
        let raw = record(
            FeedSource::Otx,
            json!({
                "name": "Repeatable",
                "adversary": "NoisyBear",
                "created": "2025-05-01T00:00:00",
                "indicators": [{"type": "IPv4", "indicator": "9.8.7.6"}]
            }),
        );
        assert_eq!(
            normalizer.normalize(&raw).unwrap(),
            normalizer.normalize(&raw).unwrap()
        );
    }

    #[test]
    fn test_validate_value_canonicalizes() {
        assert_eq!(
            validate_value(IndicatorKind::Domain, " Evil.Example ").unwrap(),
            "evil.example"
        );
        assert_eq!(
            validate_value(IndicatorKind::Cve, "cve-2024-12345").unwrap(),
            "CVE-2024-12345"
        );
        assert!(validate_value(IndicatorKind::Hash, "zz").is_err());
        assert!(validate_value(IndicatorKind::Email, "not-an-email").is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        for raw in [
            "2025-01-01T10:00:05Z",
            "2025-01-01T10:00:05",
            "2025-01-01 10:00:05",
            "2025-01-01",
        ] {
            assert!(parse_feed_timestamp(raw).is_ok(), "failed on {raw}");
        }
        assert!(parse_feed_timestamp("yesterday").is_err());
    }
}
