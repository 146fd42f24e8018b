//! Threat actor model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::models::key::NaturalKey;

/// Primary motivation attributed to an actor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Motivation {
    Espionage,
    Financial,
    Hacktivism,
    Terrorism,
    Warfare,
    Criminal,
    #[default]
    Unknown,
}

impl fmt::Display for Motivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Motivation::Espionage => "espionage",
            Motivation::Financial => "financial",
            Motivation::Hacktivism => "hacktivism",
            Motivation::Terrorism => "terrorism",
            Motivation::Warfare => "warfare",
            Motivation::Criminal => "criminal",
            Motivation::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A threat actor observation.
///
/// Aliases are a sorted set so identical raw input always serializes the
/// same way regardless of insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreatActor {
    /// Natural key (`actor:{name}`, case-folded).
    pub id: NaturalKey,
    /// Canonical display name.
    pub name: String,
    /// Alternative names seen for the same group.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Attributed country of origin, if known.
    #[serde(default)]
    pub country: Option<String>,
    /// Primary motivation.
    #[serde(default)]
    pub motivation: Motivation,
    /// Free-form sophistication assessment (e.g. "high", "advanced").
    #[serde(default)]
    pub sophistication: Option<String>,
    /// Confidence in the observation, 0.0 to 1.0.
    pub confidence: f64,
    /// Feed the observation came from.
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ThreatActor {
    pub fn new(
        name: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self {
            id: NaturalKey::actor(&name),
            name,
            aliases: BTreeSet::new(),
            country: None,
            motivation: Motivation::Unknown,
            sophistication: None,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_motivation(mut self, motivation: Motivation) -> Self {
        self.motivation = motivation;
        self
    }

    /// Sets the observation window, ordering the endpoints if needed.
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
    fn test_actor_key_ignores_case() {
        let a = ThreatActor::new("NoisyBear", 0.6, "otx", Utc::now());
        let b = ThreatActor::new("noisybear", 0.6, "otx", Utc::now());
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, "NoisyBear");
    }

    #[test]
    fn test_aliases_are_deduplicated_and_sorted() {
        let actor = ThreatActor::new("APT29", 0.9, "seed", Utc::now())
            .with_aliases(["The Dukes", "Cozy Bear", "The Dukes"]);
        assert_eq!(actor.aliases.len(), 2);
        let json = serde_json::to_string(&actor).unwrap();
        assert!(json.contains("\"aliases\":[\"Cozy Bear\",\"The Dukes\"]"));
    }

    #[test]
    fn test_default_motivation_is_unknown() {
        let actor = ThreatActor::new("X", 0.5, "otx", Utc::now());
        assert_eq!(actor.motivation, Motivation::Unknown);
    }
}
