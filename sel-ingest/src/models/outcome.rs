//! Ingestion results

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Warning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Published,
    Queued,
}

/// How the submission related to what was already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// New canonical entity
    Created,
    /// Folded into an existing canonical entity
    Merged,
    /// Matched a pending review entry, which it updated or superseded
    Resubmitted,
    /// Identical to an earlier submission from the same source; nothing changed
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub entity_id: Uuid,
    pub review_id: Option<i64>,
    pub warnings: Vec<Warning>,
    pub disposition: Disposition,
}

impl IngestOutcome {
    pub fn is_published(&self) -> bool {
        self.status == IngestStatus::Published
    }
}
