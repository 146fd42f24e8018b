//! Canonical data model for the threat graph.

pub mod actor;
pub mod campaign;
pub mod entity;
pub mod indicator;
pub mod key;
pub mod relationship;

pub use actor::{Motivation, ThreatActor};
pub use campaign::{Campaign, CampaignStatus};
pub use entity::Entity;
pub use indicator::{Indicator, IndicatorCategory, IndicatorKind};
pub use key::{InvalidKey, NaturalKey, NodeLabel};
pub use relationship::{Relationship, RelationshipType};
