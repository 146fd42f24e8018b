//! Confidence-aware merge semantics for repeated observations.
//!
//! These functions are pure and operate on JSON property maps so every
//! store adapter applies the same rules. Merging is idempotent (the same
//! observation applied twice changes nothing) and commutative for
//! observations touching disjoint optional fields under the max policy,
//! which is what makes at-least-once redelivery safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

pub type JsonMap = serde_json::Map<String, Value>;

/// How a repeated observation reconciles confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMerge {
    /// Keep the highest confidence ever observed.
    #[default]
    MaxConfidence,
    /// A strictly newer observation overwrites confidence even when lower;
    /// otherwise fall back to the max rule.
    PreferRecency,
}

/// Merge configuration applied by store adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MergePolicy {
    #[serde(default)]
    pub confidence: ConfidenceMerge,
}

impl MergePolicy {
    pub fn prefer_recency() -> Self {
        Self {
            confidence: ConfidenceMerge::PreferRecency,
        }
    }
}

// Fields with dedicated merge rules. Everything else follows the generic
// scalar rule: fill when absent, overwrite when the incoming observation
// is at least as recent.
const NODE_SPECIAL: &[&str] = &["first_seen", "last_seen", "confidence", "aliases"];
const EDGE_SPECIAL: &[&str] = &["first_observed", "last_observed", "confidence"];

/// Merges an incoming node observation into the stored properties.
///
/// Rules: `first_seen` keeps the minimum, `last_seen` the maximum,
/// `aliases` the set union. Confidence follows the policy, judged against
/// the stored `last_seen` before it widens. Remaining scalars fill when
/// absent and overwrite when the incoming `last_seen` is not older than
/// the stored one.
pub fn merge_node_properties(existing: &mut JsonMap, incoming: &JsonMap, policy: MergePolicy) {
    let incoming_newer = is_strictly_newer(existing, incoming, "last_seen");
    let incoming_not_older = !is_strictly_newer(incoming, existing, "last_seen");

    merge_confidence(existing, incoming, policy, incoming_newer);
    keep_earliest(existing, incoming, "first_seen");
    keep_latest(existing, incoming, "last_seen");
    merge_aliases(existing, incoming);

    for (field, value) in incoming {
        if NODE_SPECIAL.contains(&field.as_str()) {
            continue;
        }
        merge_scalar(existing, field, value, incoming_not_older);
    }
}

/// Merges an incoming edge observation into the stored properties.
///
/// The observation window widens (`first_observed` min, `last_observed`
/// max); confidence follows the policy judged against the stored
/// `last_observed` before it widens.
pub fn merge_edge_properties(existing: &mut JsonMap, incoming: &JsonMap, policy: MergePolicy) {
    let incoming_newer = is_strictly_newer(existing, incoming, "last_observed");
    let incoming_not_older = !is_strictly_newer(incoming, existing, "last_observed");

    merge_confidence(existing, incoming, policy, incoming_newer);
    keep_earliest(existing, incoming, "first_observed");
    keep_latest(existing, incoming, "last_observed");

    for (field, value) in incoming {
        if EDGE_SPECIAL.contains(&field.as_str()) {
            continue;
        }
        merge_scalar(existing, field, value, incoming_not_older);
    }
}

fn merge_confidence(
    existing: &mut JsonMap,
    incoming: &JsonMap,
    policy: MergePolicy,
    incoming_newer: bool,
) {
    let Some(theirs) = read_f64(incoming, "confidence") else {
        return;
    };
    let merged = match (read_f64(existing, "confidence"), policy.confidence) {
        (None, _) => theirs,
        (Some(_), ConfidenceMerge::PreferRecency) if incoming_newer => theirs,
        (Some(ours), _) => ours.max(theirs),
    };
    existing.insert("confidence".into(), json_f64(merged));
}

fn merge_aliases(existing: &mut JsonMap, incoming: &JsonMap) {
    let theirs = read_string_set(incoming, "aliases");
    if theirs.is_empty() {
        return;
    }
    let mut union = read_string_set(existing, "aliases");
    union.extend(theirs);
    existing.insert(
        "aliases".into(),
        Value::Array(union.into_iter().map(Value::String).collect()),
    );
}

fn merge_scalar(existing: &mut JsonMap, field: &str, value: &Value, incoming_not_older: bool) {
    if value.is_null() {
        return;
    }
    let absent = existing.get(field).is_none_or(Value::is_null);
    if absent || incoming_not_older {
        existing.insert(field.to_string(), value.clone());
    }
}

fn keep_earliest(existing: &mut JsonMap, incoming: &JsonMap, field: &str) {
    let Some(theirs) = read_time(incoming, field) else {
        return;
    };
    match read_time(existing, field) {
        Some(ours) if ours <= theirs => {}
        _ => {
            if let Some(value) = incoming.get(field) {
                existing.insert(field.to_string(), value.clone());
            }
        }
    }
}

fn keep_latest(existing: &mut JsonMap, incoming: &JsonMap, field: &str) {
    let Some(theirs) = read_time(incoming, field) else {
        return;
    };
    match read_time(existing, field) {
        Some(ours) if ours >= theirs => {}
        _ => {
            if let Some(value) = incoming.get(field) {
                existing.insert(field.to_string(), value.clone());
            }
        }
    }
}

/// True when `b`'s timestamp in `field` is strictly after `a`'s. A side
/// with no parsable timestamp never wins; `b` against an absent `a` does.
fn is_strictly_newer(a: &JsonMap, b: &JsonMap, field: &str) -> bool {
    match (read_time(a, field), read_time(b, field)) {
        (Some(ours), Some(theirs)) => theirs > ours,
        (None, Some(_)) => true,
        _ => false,
    }
}

fn read_time(props: &JsonMap, field: &str) -> Option<DateTime<Utc>> {
    props
        .get(field)?
        .as_str()?
        .parse::<DateTime<Utc>>()
        .ok()
}

fn read_f64(props: &JsonMap, field: &str) -> Option<f64> {
    props.get(field).and_then(Value::as_f64)
}

fn read_string_set(props: &JsonMap, field: &str) -> BTreeSet<String> {
    props
        .get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
