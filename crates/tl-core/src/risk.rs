//! Threat-level scoring for asset context summaries.
//!
//! Downstream analytics consume this as a pure function over a context
//! summary; nothing here touches the graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Qualitative threat level derived from indicator volume and confidence.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Unknown => "unknown",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about the threats facing one asset, aggregated from
/// the indicators observed on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ThreatContext {
    pub indicator_count: usize,
    /// Highest confidence among the observed indicators.
    pub max_confidence: f64,
    #[serde(default)]
    pub threat_actors: BTreeSet<String>,
    #[serde(default)]
    pub campaigns: BTreeSet<String>,
}

impl ThreatContext {
    /// Folds one observed indicator into the summary.
    pub fn record_indicator(&mut self, confidence: f64) {
        self.indicator_count += 1;
        if confidence > self.max_confidence {
            self.max_confidence = confidence;
        }
    }

    pub fn threat_level(&self) -> ThreatLevel {
        threat_level(self.indicator_count, self.max_confidence)
    }
}

/// Maps indicator volume and peak confidence to a threat level.
///
/// Both thresholds must hold for a tier; otherwise evaluation falls
/// through to the next one.
pub fn threat_level(indicator_count: usize, max_confidence: f64) -> ThreatLevel {
    if indicator_count == 0 {
        ThreatLevel::Unknown
    } else if indicator_count >= 10 && max_confidence >= 0.8 {
        ThreatLevel::Critical
    } else if indicator_count >= 5 && max_confidence >= 0.6 {
        ThreatLevel::High
    } else if indicator_count >= 2 && max_confidence >= 0.4 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_table() {
        assert_eq!(threat_level(0, 1.0), ThreatLevel::Unknown);
        assert_eq!(threat_level(10, 0.8), ThreatLevel::Critical);
        assert_eq!(threat_level(10, 0.79), ThreatLevel::High);
        assert_eq!(threat_level(5, 0.6), ThreatLevel::High);
        assert_eq!(threat_level(2, 0.4), ThreatLevel::Medium);
        assert_eq!(threat_level(1, 0.99), ThreatLevel::Low);
        assert_eq!(threat_level(4, 0.3), ThreatLevel::Low);
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert!(ThreatLevel::Low > ThreatLevel::Unknown);
    }

    #[test]
    fn test_context_tracks_peak_confidence() {
        let mut ctx = ThreatContext::default();
        for confidence in [0.3, 0.9, 0.5] {
            ctx.record_indicator(confidence);
        }
        assert_eq!(ctx.indicator_count, 3);
        assert_eq!(ctx.max_confidence, 0.9);
        assert_eq!(ctx.threat_level(), ThreatLevel::Medium);
    }
}
