//! The canonical entity union and its wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::actor::ThreatActor;
use crate::models::campaign::Campaign;
use crate::models::indicator::Indicator;
use crate::models::key::{NaturalKey, NodeLabel};

/// One normalized entity observation.
///
/// Internally tagged on `type`, so an indicator serializes as
/// `{"type": "indicator", "id": ..., "kind": ..., "value": ..., ...}`, so the
/// shape published on the `entities` topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Indicator(Indicator),
    ThreatActor(ThreatActor),
    Campaign(Campaign),
}

impl Entity {
    /// Natural key of the underlying entity.
    pub fn key(&self) -> &NaturalKey {
        match self {
            Entity::Indicator(i) => &i.id,
            Entity::ThreatActor(a) => &a.id,
            Entity::Campaign(c) => &c.id,
        }
    }

    /// Graph label for the underlying entity.
    pub fn label(&self) -> NodeLabel {
        match self {
            Entity::Indicator(_) => NodeLabel::Indicator,
            Entity::ThreatActor(_) => NodeLabel::ThreatActor,
            Entity::Campaign(_) => NodeLabel::Campaign,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Entity::Indicator(i) => i.confidence,
            Entity::ThreatActor(a) => a.confidence,
            Entity::Campaign(c) => c.confidence,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Entity::Indicator(i) => &i.source,
            Entity::ThreatActor(a) => &a.source,
            Entity::Campaign(c) => &c.source,
        }
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        match self {
            Entity::Indicator(i) => i.first_seen,
            Entity::ThreatActor(a) => a.first_seen,
            Entity::Campaign(c) => c.first_seen,
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        match self {
            Entity::Indicator(i) => i.last_seen,
            Entity::ThreatActor(a) => a.last_seen,
            Entity::Campaign(c) => c.last_seen,
        }
    }

    /// Flattens the entity into a graph property map.
    ///
    /// The `type` discriminator is dropped (the label carries it) and the
    /// natural key stays in as `id`, matching the store's key property.
    pub fn to_properties(&self) -> serde_json::Map<String, serde_json::Value> {
        let value = serde_json::to_value(self).unwrap_or_default();
        let mut map = match value {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.remove("type");
        map
    }
}

impl From<Indicator> for Entity {
    fn from(indicator: Indicator) -> Self {
        Entity::Indicator(indicator)
    }
}

impl From<ThreatActor> for Entity {
    fn from(actor: ThreatActor) -> Self {
        Entity::ThreatActor(actor)
    }
}

impl From<Campaign> for Entity {
    fn from(campaign: Campaign) -> Self {
        Entity::Campaign(campaign)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::indicator::{IndicatorCategory, IndicatorKind};

    #[test]
    fn test_indicator_event_wire_shape() {
        let entity: Entity = Indicator::new(
            IndicatorKind::Ip,
            "1.2.3.4",
            IndicatorCategory::CommandAndControl,
            0.9,
            "feodo",
            Utc::now(),
        )
        .into();

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "indicator");
        assert_eq!(json["id"], "indicator:ip:1.2.3.4");
        assert_eq!(json["kind"], "ip");
        assert_eq!(json["value"], "1.2.3.4");
        assert_eq!(json["category"], "command_and_control");
        assert_eq!(json["source"], "feodo");
        assert!(json.get("confidence").is_some());
        assert!(json.get("first_seen").is_some());
        assert!(json.get("last_seen").is_some());
    }

    #[test]
    fn test_round_trip_through_wire_shape() {
        let entity: Entity = ThreatActor::new("NoisyBear", 0.6, "otx", Utc::now())
            .with_country("Unknown")
            .into();
        let bytes = serde_json::to_vec(&entity).unwrap();
        let back: Entity = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(entity, back);
    }

    #[test]
    fn test_to_properties_drops_tag_keeps_id() {
        let entity: Entity = Campaign::new("OpBarrel", 0.6, "otx", Utc::now()).into();
        let props = entity.to_properties();
        assert!(props.get("type").is_none());
        assert_eq!(
            props.get("id").and_then(|v| v.as_str()),
            Some("campaign:opbarrel")
        );
        assert_eq!(props.get("name").and_then(|v| v.as_str()), Some("OpBarrel"));
    }

    #[test]
    fn test_label_matches_variant() {
        let entity: Entity = Campaign::new("X", 0.5, "otx", Utc::now()).into();
        assert_eq!(entity.label(), NodeLabel::Campaign);
        assert_eq!(entity.key().label(), Some(NodeLabel::Campaign));
    }
}
