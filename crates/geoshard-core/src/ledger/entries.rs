//! Progress ledger entry types.
//!
//! One entry per processed item outcome; the step enum records which
//! pipeline stage a failure happened in, so operators can see what is
//! failing without reprocessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline step an item failed in.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FailureStep {
    /// Fetching the record from its source
    Fetch,
    /// Building/validating the record (routing, geometry)
    Transform,
    /// Persisting the record to its partition
    Insert,
}

impl fmt::Display for FailureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStep::Fetch => "fetch",
            FailureStep::Transform => "transform",
            FailureStep::Insert => "insert",
        };
        f.write_str(name)
    }
}

/// Outcome of processing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    /// Item was fully processed
    Success,
    /// Item failed at the given step
    Failed {
        /// Step the failure happened in
        step: FailureStep,
    },
}

impl Outcome {
    /// Whether this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One persisted ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Item identifier
    pub item_id: String,
    /// Outcome, with failure step when applicable
    #[serde(flatten)]
    pub outcome: Outcome,
    /// When the outcome was recorded
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = LedgerEntry {
            item_id: "scene-42".into(),
            outcome: Outcome::Failed {
                step: FailureStep::Insert,
            },
            recorded_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"outcome\":\"failed\""));
        assert!(json.contains("\"step\":\"insert\""));

        let parsed: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.outcome, entry.outcome);
        assert_eq!(parsed.item_id, "scene-42");
    }

    #[test]
    fn test_success_entry_has_no_step() {
        let entry = LedgerEntry {
            item_id: "scene-1".into(),
            outcome: Outcome::Success,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(!json.contains("step"));
    }
}
