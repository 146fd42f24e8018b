//! Natural keys for graph entities.
//!
//! Every node in the graph is addressed by a stable, content-derived key
//! instead of a surrogate id. The key embeds the node label as a prefix
//! (`indicator:ip:1.2.3.4`, `actor:noisybear`, `campaign:opbarrel`,
//! `asset:web-server-01`), so any component holding a key can recover the
//! label without a round trip to the store. Keys are never reassigned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::indicator::IndicatorKind;

/// Graph node labels the pipeline knows about.
///
/// `Asset` nodes are owned by the query layer; the pipeline references them
/// in edges but never creates them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeLabel {
    Indicator,
    ThreatActor,
    Campaign,
    Asset,
}

impl NodeLabel {
    /// Returns the label as used in graph queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Indicator => "Indicator",
            NodeLabel::ThreatActor => "ThreatActor",
            NodeLabel::Campaign => "Campaign",
            NodeLabel::Asset => "Asset",
        }
    }

    /// Returns the key prefix for this label.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            NodeLabel::Indicator => "indicator",
            NodeLabel::ThreatActor => "actor",
            NodeLabel::Campaign => "campaign",
            NodeLabel::Asset => "asset",
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stable, content-derived entity key.
///
/// Serialized as a plain string so events and graph properties carry it
/// without structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    /// Key for an indicator, derived from kind and value.
    pub fn indicator(kind: IndicatorKind, value: &str) -> Self {
        Self(format!("indicator:{}:{}", kind.as_str(), value.trim()))
    }

    /// Key for a threat actor. Names are case-folded so `NoisyBear` and
    /// `noisybear` address the same node.
    pub fn actor(name: &str) -> Self {
        Self(format!("actor:{}", name.trim().to_lowercase()))
    }

    /// Key for a campaign, case-folded like actor names.
    pub fn campaign(name: &str) -> Self {
        Self(format!("campaign:{}", name.trim().to_lowercase()))
    }

    /// Key for an externally owned asset.
    pub fn asset(id: &str) -> Self {
        Self(format!("asset:{}", id.trim()))
    }

    /// The node label encoded in the key prefix, if the prefix is known.
    pub fn label(&self) -> Option<NodeLabel> {
        let prefix = self.0.split(':').next()?;
        match prefix {
            "indicator" => Some(NodeLabel::Indicator),
            "actor" => Some(NodeLabel::ThreatActor),
            "campaign" => Some(NodeLabel::Campaign),
            "asset" => Some(NodeLabel::Asset),
            _ => None,
        }
    }

    /// Borrows the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NaturalKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = Self(s.to_string());
        if s.is_empty() || key.label().is_none() {
            return Err(InvalidKey(s.to_string()));
        }
        Ok(key)
    }
}

impl From<NaturalKey> for String {
    fn from(key: NaturalKey) -> Self {
        key.0
    }
}

/// Error returned when parsing a string that is not a recognized key.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid natural key: {0}")]
pub struct InvalidKey(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_key_format() {
        let key = NaturalKey::indicator(IndicatorKind::Ip, "1.2.3.4");
        assert_eq!(key.as_str(), "indicator:ip:1.2.3.4");
        assert_eq!(key.label(), Some(NodeLabel::Indicator));
    }

    #[test]
    fn test_actor_key_is_case_folded() {
        assert_eq!(
            NaturalKey::actor("NoisyBear"),
            NaturalKey::actor("noisybear")
        );
    }

    #[test]
    fn test_campaign_key_trims_whitespace() {
        let key = NaturalKey::campaign("  OpBarrel ");
        assert_eq!(key.as_str(), "campaign:opbarrel");
    }

    #[test]
    fn test_label_round_trip() {
        let key = NaturalKey::asset("web-server-01");
        assert_eq!(key.label(), Some(NodeLabel::Asset));
        assert_eq!(key.label().unwrap().as_str(), "Asset");
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!("widget:foo".parse::<NaturalKey>().is_err());
        assert!("".parse::<NaturalKey>().is_err());
        assert!("actor:noisybear".parse::<NaturalKey>().is_ok());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = NaturalKey::actor("noisybear");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"actor:noisybear\"");
    }
}
