//! Campaign model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::key::NaturalKey;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Inactive,
    Completed,
    Suspended,
    #[default]
    Unknown,
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Inactive => "inactive",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Suspended => "suspended",
            CampaignStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// A campaign observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    /// Natural key (`campaign:{name}`, case-folded).
    pub id: NaturalKey,
    /// Canonical display name.
    pub name: String,
    #[serde(default)]
    pub status: CampaignStatus,
    /// Stated objectives, in the order the source reported them.
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Confidence in the observation, 0.0 to 1.0.
    pub confidence: f64,
    /// Feed the observation came from.
    pub source: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        name: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self {
            id: NaturalKey::campaign(&name),
            name,
            status: CampaignStatus::Unknown,
            objectives: Vec::new(),
            start_date: None,
            end_date: None,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            first_seen: observed_at,
            last_seen: observed_at,
        }
    }

    pub fn with_status(mut self, status: CampaignStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_objectives<I, S>(mut self, objectives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objectives = objectives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dates(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
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
    fn test_campaign_key_from_name() {
        let c = Campaign::new("OpBarrel", 0.6, "otx", Utc::now());
        assert_eq!(c.id.as_str(), "campaign:opbarrel");
    }

    #[test]
    fn test_objectives_preserve_order() {
        let c = Campaign::new("X", 0.5, "seed", Utc::now())
            .with_objectives(["data_theft", "espionage"]);
        assert_eq!(c.objectives, vec!["data_theft", "espionage"]);
    }
}
