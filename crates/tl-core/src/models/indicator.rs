//! Indicator of compromise model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::key::NaturalKey;

/// The technical type of an indicator value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Ip,
    Domain,
    Url,
    Hash,
    Email,
    Cve,
}

impl IndicatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::Ip => "ip",
            IndicatorKind::Domain => "domain",
            IndicatorKind::Url => "url",
            IndicatorKind::Hash => "hash",
            IndicatorKind::Email => "email",
            IndicatorKind::Cve => "cve",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(IndicatorKind::Ip),
            "domain" => Ok(IndicatorKind::Domain),
            "url" => Ok(IndicatorKind::Url),
            "hash" => Ok(IndicatorKind::Hash),
            "email" => Ok(IndicatorKind::Email),
            "cve" => Ok(IndicatorKind::Cve),
            other => Err(format!("unknown indicator kind: {}", other)),
        }
    }
}

/// Why an indicator is considered malicious.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorCategory {
    Malware,
    AttackInfrastructure,
    Compromised,
    Suspicious,
    Phishing,
    CommandAndControl,
    LateralMovement,
    DataExfiltration,
}

impl IndicatorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorCategory::Malware => "malware",
            IndicatorCategory::AttackInfrastructure => "attack_infrastructure",
            IndicatorCategory::Compromised => "compromised",
            IndicatorCategory::Suspicious => "suspicious",
            IndicatorCategory::Phishing => "phishing",
            IndicatorCategory::CommandAndControl => "command_and_control",
            IndicatorCategory::LateralMovement => "lateral_movement",
            IndicatorCategory::DataExfiltration => "data_exfiltration",
        }
    }
}

impl fmt::Display for IndicatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A canonical indicator observation.
///
/// One sighting of a technical artifact from one feed. The natural key is
/// derived from `kind` and `value`, so repeated sightings of the same
/// artifact converge on a single graph node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Indicator {
    /// Natural key (`indicator:{kind}:{value}`).
    pub id: NaturalKey,
    /// Technical type of the value.
    pub kind: IndicatorKind,
    /// The artifact itself (IP literal, domain, URL, hash digest, ...).
    pub value: String,
    /// Why the artifact is on a feed.
    pub category: IndicatorCategory,
    /// Confidence in the observation, 0.0 to 1.0.
    pub confidence: f64,
    /// Feed the observation came from.
    pub source: String,
    /// When the artifact was first observed.
    pub first_seen: DateTime<Utc>,
    /// When the artifact was last observed.
    pub last_seen: DateTime<Utc>,
}

impl Indicator {
    /// Creates an indicator observed at a single instant.
    ///
    /// Confidence is clamped to [0.0, 1.0].
    pub fn new(
        kind: IndicatorKind,
        value: impl Into<String>,
        category: IndicatorCategory,
        confidence: f64,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let value = value.into();
        Self {
            id: NaturalKey::indicator(kind, &value),
            kind,
            value,
            category,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }

    /// Widens the observation window to include `seen_at`.
    pub fn with_seen_range(mut self, first: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        self.first_seen = first.min(last);
        self.last_seen = last.max(first);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_key_from_kind_and_value() {
        let ind = Indicator::new(
            IndicatorKind::Domain,
            "evil.example",
            IndicatorCategory::Phishing,
            0.8,
            "urlhaus",
            Utc::now(),
        );
        assert_eq!(ind.id.as_str(), "indicator:domain:evil.example");
        assert_eq!(ind.first_seen, ind.last_seen);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let ind = Indicator::new(
            IndicatorKind::Ip,
            "1.2.3.4",
            IndicatorCategory::CommandAndControl,
            1.7,
            "feodo",
            Utc::now(),
        );
        assert_eq!(ind.confidence, 1.0);
    }

    #[test]
    fn test_seen_range_orders_endpoints() {
        let a = Utc::now();
        let b = a + chrono::Duration::hours(2);
        let ind = Indicator::new(
            IndicatorKind::Ip,
            "1.2.3.4",
            IndicatorCategory::CommandAndControl,
            0.9,
            "feodo",
            a,
        )
        .with_seen_range(b, a);
        assert!(ind.first_seen <= ind.last_seen);
    }

    #[test]
    fn test_kind_serde_round_trip() {
        let json = serde_json::to_string(&IndicatorKind::Cve).unwrap();
        assert_eq!(json, "\"cve\"");
        let back: IndicatorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IndicatorKind::Cve);
    }
}
