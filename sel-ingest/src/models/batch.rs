//! Batch ingestion status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Pending,
    Published,
    Queued,
    Rejected,
    Failed,
}

impl BatchItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchItemStatus::Pending => "pending",
            BatchItemStatus::Published => "published",
            BatchItemStatus::Queued => "queued",
            BatchItemStatus::Rejected => "rejected",
            BatchItemStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, BatchItemStatus::Pending)
    }
}

impl std::str::FromStr for BatchItemStatus {
    type Err = sel_common::Error;

    fn from_str(s: &str) -> sel_common::Result<Self> {
        match s {
            "pending" => Ok(BatchItemStatus::Pending),
            "published" => Ok(BatchItemStatus::Published),
            "queued" => Ok(BatchItemStatus::Queued),
            "rejected" => Ok(BatchItemStatus::Rejected),
            "failed" => Ok(BatchItemStatus::Failed),
            other => Err(sel_common::Error::Internal(format!("unknown batch status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub index: i64,
    pub status: BatchItemStatus,
    pub entity_id: Option<Uuid>,
    pub review_id: Option<i64>,
    pub message: Option<String>,
    /// Field errors for validation failures, prior decision for rejections
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub total: usize,
    pub completed: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items: Vec<BatchItemResult>,
}
