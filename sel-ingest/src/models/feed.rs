//! Change feed entries and tombstones

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Merge,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::Merge => "merge",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(ChangeAction::Create),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            "merge" => Ok(ChangeAction::Merge),
            other => Err(Error::InvalidInput(format!("unknown change action '{}'", other))),
        }
    }
}

/// One canonical mutation, in authoritative replication order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub sequence_number: i64,
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub action: ChangeAction,
    pub changed_fields: Vec<String>,
    /// Linked-data framed entity after the mutation
    pub snapshot: Value,
    pub created_at: DateTime<Utc>,
}

/// Durable record of a deletion so peers propagate it instead of resurrecting the entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: i64,
    /// `None` when the deleted entity was never stored here
    pub entity_id: Option<Uuid>,
    pub entity_uri: String,
    pub kind: EntityKind,
    pub deleted_at: DateTime<Utc>,
    pub reason: String,
    pub superseded_by: Option<String>,
    pub snapshot: Option<Value>,
}

/// Tombstone reasons
pub mod reasons {
    pub const DUPLICATE_MERGED: &str = "duplicate_merged";
    pub const REJECTED: &str = "rejected";
    pub const REVIEW_EXPIRED: &str = "review_expired";
    pub const ADMIN_DELETE: &str = "admin_delete";
    pub const FEDERATED_DELETE: &str = "federated_delete";
}
