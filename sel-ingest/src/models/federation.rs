//! Federation peers and the sync exchange

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ChangeAction;

/// A registered peer node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationNode {
    pub peer_id: String,
    pub node_domain: String,
    pub base_url: String,
    /// 1..=10, applied to every source record received from this peer
    pub trust_level: u8,
    pub sync_enabled: bool,
    /// Highest peer sequence number received
    pub last_synced_cursor: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One change feed entry as pushed by a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerChange {
    /// Sequence number in the sending peer's own feed
    pub sequence_number: i64,
    pub action: ChangeAction,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    /// Linked-data framed entity; `@id` is the origin URI
    pub snapshot: Value,
}

impl PeerChange {
    /// Per-change idempotency key
    pub fn idempotency_key(&self, peer_id: &str) -> String {
        format!("{}:{}", peer_id, self.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created { entity_id: Uuid },
    Updated { entity_id: Uuid },
    Deleted { entity_id: Uuid },
    /// Entity is owned here; the change was kept as a source record only
    SourceRecorded { entity_id: Uuid },
    /// Nothing to apply; the reason says why
    Ignored { reason: String },
    /// The idempotency key was already used for a different change
    Conflict { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItemResult {
    pub idempotency_key: String,
    pub sequence_number: i64,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    /// True when this result came from the idempotency cache
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub peer_id: String,
    pub results: Vec<SyncItemResult>,
    /// Peer cursor after this push
    pub cursor: i64,
    /// True when the whole response came from the idempotency cache
    pub replayed: bool,
}
