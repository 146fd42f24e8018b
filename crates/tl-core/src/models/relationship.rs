//! Typed relationships between entity natural keys.
//!
//! A relationship is identified by the ordered triple
//! `(source_key, target_key, type)`. The pipeline never stores two edges for
//! the same triple; repeated observations merge into one edge with a widened
//! observation window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::key::NaturalKey;

/// Edge types the graph schema recognizes.
///
/// Serialized in SCREAMING_SNAKE_CASE to match graph edge-type conventions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Indicator is used by a threat actor.
    UsedBy,
    /// Threat actor belongs to a campaign.
    BelongsTo,
    /// Campaign involves an indicator.
    Involves,
    /// Campaign or actor targets an asset or sector.
    Targets,
    /// Indicator was observed on an asset.
    ObservedOn,
    /// Asset is exposed to an indicator.
    ExposedTo,
    /// Generic co-occurrence association.
    AssociatedWith,
    /// Domain or URL resolves to an address.
    ResolvesTo,
}

impl RelationshipType {
    /// Returns the edge type as written in graph queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::UsedBy => "USED_BY",
            RelationshipType::BelongsTo => "BELONGS_TO",
            RelationshipType::Involves => "INVOLVES",
            RelationshipType::Targets => "TARGETS",
            RelationshipType::ObservedOn => "OBSERVED_ON",
            RelationshipType::ExposedTo => "EXPOSED_TO",
            RelationshipType::AssociatedWith => "ASSOCIATED_WITH",
            RelationshipType::ResolvesTo => "RESOLVES_TO",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USED_BY" => Ok(RelationshipType::UsedBy),
            "BELONGS_TO" => Ok(RelationshipType::BelongsTo),
            "INVOLVES" => Ok(RelationshipType::Involves),
            "TARGETS" => Ok(RelationshipType::Targets),
            "OBSERVED_ON" => Ok(RelationshipType::ObservedOn),
            "EXPOSED_TO" => Ok(RelationshipType::ExposedTo),
            "ASSOCIATED_WITH" => Ok(RelationshipType::AssociatedWith),
            "RESOLVES_TO" => Ok(RelationshipType::ResolvesTo),
            other => Err(format!("unknown relationship type: {}", other)),
        }
    }
}

/// One observed relationship between two entities.
///
/// This is also the wire shape published on the `relationships` topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    /// Natural key of the edge source.
    pub source_key: NaturalKey,
    /// Natural key of the edge target.
    pub target_key: NaturalKey,
    /// Edge type.
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    /// Confidence in the relationship, 0.0 to 1.0.
    pub confidence: f64,
    /// When the relationship was observed.
    pub observed_at: DateTime<Utc>,
    /// Additional edge properties carried verbatim into the store.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Relationship {
    pub fn new(
        source_key: NaturalKey,
        target_key: NaturalKey,
        kind: RelationshipType,
        confidence: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_key,
            target_key,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            observed_at,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        self.properties.insert(name.to_string(), value);
        self
    }

    /// The identity triple for deduplication.
    pub fn triple(&self) -> (&str, &str, RelationshipType) {
        (self.source_key.as_str(), self.target_key.as_str(), self.kind)
    }

    /// Returns true if either endpoint is the given key.
    pub fn involves(&self, key: &NaturalKey) -> bool {
        &self.source_key == key || &self.target_key == key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::indicator::IndicatorKind;

    #[test]
    fn test_wire_shape_uses_type_field() {
        let rel = Relationship::new(
            NaturalKey::indicator(IndicatorKind::Ip, "1.2.3.4"),
            NaturalKey::actor("NoisyBear"),
            RelationshipType::UsedBy,
            0.6,
            Utc::now(),
        );
        let json = serde_json::to_value(&rel).unwrap();
        assert_eq!(json["type"], "USED_BY");
        assert_eq!(json["source_key"], "indicator:ip:1.2.3.4");
        assert_eq!(json["target_key"], "actor:noisybear");
    }

    #[test]
    fn test_triple_identity() {
        let a = Relationship::new(
            NaturalKey::actor("a"),
            NaturalKey::campaign("c"),
            RelationshipType::BelongsTo,
            0.5,
            Utc::now(),
        );
        let b = Relationship::new(
            NaturalKey::actor("a"),
            NaturalKey::campaign("c"),
            RelationshipType::BelongsTo,
            0.9,
            Utc::now(),
        );
        assert_eq!(a.triple(), b.triple());
    }

    #[test]
    fn test_type_round_trip() {
        for ty in [
            RelationshipType::UsedBy,
            RelationshipType::BelongsTo,
            RelationshipType::Involves,
            RelationshipType::Targets,
            RelationshipType::ObservedOn,
            RelationshipType::ExposedTo,
            RelationshipType::AssociatedWith,
            RelationshipType::ResolvesTo,
        ] {
            assert_eq!(ty.as_str().parse::<RelationshipType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_involves() {
        let key = NaturalKey::actor("noisybear");
        let rel = Relationship::new(
            key.clone(),
            NaturalKey::campaign("opbarrel"),
            RelationshipType::BelongsTo,
            0.5,
            Utc::now(),
        );
        assert!(rel.involves(&key));
        assert!(!rel.involves(&NaturalKey::actor("other")));
    }
}
