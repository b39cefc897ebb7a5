//! Review queue entries, warnings and the review state machine
//!
//! ```text
//! pending ──approve/fix──▶ approved
//!    │ ───reject────────▶ rejected
//!    └───supersede──────▶ superseded
//! ```
//! All three outcomes are terminal.

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Warning codes
pub mod codes {
    pub const REVERSED_DATES_TIMEZONE_LIKELY: &str = "reversed_dates_timezone_likely";
    pub const REVERSED_DATES_NEEDS_REVIEW: &str = "reversed_dates_corrected_needs_review";
    pub const MISSING_DESCRIPTION: &str = "missing_description";
    pub const TOO_FAR_FUTURE: &str = "too_far_future";
    pub const POTENTIAL_DUPLICATE: &str = "potential_duplicate";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Correction is almost certainly right; informational only
    High,
    /// Correction or finding needs a human
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub field: String,
    pub code: String,
    pub message: String,
    pub confidence: Confidence,
}

impl Warning {
    pub fn high(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.to_string(),
            message: message.into(),
            confidence: Confidence::High,
        }
    }

    pub fn low(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.to_string(),
            message: message.into(),
            confidence: Confidence::Low,
        }
    }
}

/// A submission needs a reviewer iff any warning is low confidence
pub fn requires_review(warnings: &[Warning]) -> bool {
    warnings.iter().any(|w| w.confidence == Confidence::Low)
}

/// Distinct warning codes, for comparing a resubmission against a past rejection
pub fn warning_codes(warnings: &[Warning]) -> BTreeSet<&str> {
    warnings.iter().map(|w| w.code.as_str()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Supersede,
    Fix,
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Supersede => "supersede",
            ReviewAction::Fix => "fix",
        };
        f.write_str(s)
    }
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Superseded => "superseded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }

    /// The transition function. Only `Pending` accepts actions.
    pub fn apply(self, action: ReviewAction) -> Result<ReviewStatus> {
        match (self, action) {
            (ReviewStatus::Pending, ReviewAction::Approve | ReviewAction::Fix) => {
                Ok(ReviewStatus::Approved)
            }
            (ReviewStatus::Pending, ReviewAction::Reject) => Ok(ReviewStatus::Rejected),
            (ReviewStatus::Pending, ReviewAction::Supersede) => Ok(ReviewStatus::Superseded),
            (from, action) => Err(Error::InvalidTransition {
                from: from.as_str().to_string(),
                action: action.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            "superseded" => Ok(ReviewStatus::Superseded),
            other => Err(Error::InvalidInput(format!("unknown review status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEntry {
    pub id: i64,
    pub entity_id: Uuid,
    /// As submitted, retained for audit
    pub original_payload: Value,
    /// What the canonical entity holds
    pub normalized_payload: Value,
    pub warnings: Vec<Warning>,
    pub dedup_key: Option<String>,
    /// `<source_id>:<external_id>` when the producer supplied an external id
    pub source_key: Option<String>,
    pub payload_hash: String,
    pub effective_start: Option<DateTime<Utc>>,
    pub effective_end: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewEntry {
    /// A rejection stops blocking resubmissions once the event is over
    pub fn rejection_still_applies(&self, now: DateTime<Utc>) -> bool {
        self.status == ReviewStatus::Rejected
            && self
                .effective_end
                .or(self.effective_start)
                .map_or(true, |end| end > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_accepts_every_action() {
        assert_eq!(ReviewStatus::Pending.apply(ReviewAction::Approve).unwrap(), ReviewStatus::Approved);
        assert_eq!(ReviewStatus::Pending.apply(ReviewAction::Fix).unwrap(), ReviewStatus::Approved);
        assert_eq!(ReviewStatus::Pending.apply(ReviewAction::Reject).unwrap(), ReviewStatus::Rejected);
        assert_eq!(
            ReviewStatus::Pending.apply(ReviewAction::Supersede).unwrap(),
            ReviewStatus::Superseded
        );
    }

    #[test]
    fn terminal_states_reject_actions() {
        for status in [ReviewStatus::Approved, ReviewStatus::Rejected, ReviewStatus::Superseded] {
            assert!(status.is_terminal());
            for action in [
                ReviewAction::Approve,
                ReviewAction::Reject,
                ReviewAction::Supersede,
                ReviewAction::Fix,
            ] {
                assert!(matches!(status.apply(action), Err(Error::InvalidTransition { .. })));
            }
        }
    }

    #[test]
    fn only_low_confidence_requires_review() {
        let high = Warning::high("endDate", codes::REVERSED_DATES_TIMEZONE_LIKELY, "shifted");
        let low = Warning::low("description", codes::MISSING_DESCRIPTION, "missing");
        assert!(!requires_review(&[high.clone()]));
        assert!(requires_review(&[high, low]));
        assert!(!requires_review(&[]));
    }
}
