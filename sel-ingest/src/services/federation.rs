//! Federation sync
//!
//! Peers push their change feed entries here. Delivery is at-least-once, so
//! every change is applied under an idempotency key derived from the peer's
//! own sequence number, and the key is stored in the same transaction as the
//! mutation it guards. A replayed key returns the stored outcome.
//!
//! Conflict rules:
//! - an entity owned by this node is never overwritten; the change is kept as
//!   a source record
//! - a tombstoned URI is never resurrected
//! - a change older than the last one applied for the entity is ignored
//! - a delete for something never stored here only records a tombstone

use chrono::{DateTime, Duration, Utc};
use sel_common::linked_data::{self, fingerprint, Unframed};
use sel_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dedup::{merge_units, reproject};
use super::normalizer::{normalize, Normalized};
use super::validator::classify;
use crate::db::provenance::{self, FieldObservation};
use crate::db::{changes, entities, idempotency, nodes, tombstones, Store};
use crate::models::feed::reasons;
use crate::models::payload::input_from_fields;
use crate::models::{
    requires_review, CanonicalEntity, ChangeAction, EntityKind, EventDraft, FederationNode,
    LifecycleState, PeerChange, ProducerKind, SourceMeta, SyncItemResult, SyncOutcome, SyncResult,
};
use crate::utils::retry_on_lock;

const LIFECYCLE_FIELD: &str = "lifecycleState";
const SUPERSEDED_BY_FIELD: &str = "supersededBy";

/// Local lifecycle for a replicated snapshot. `None` means the peer reports
/// the entity as deleted.
pub fn map_lifecycle(remote: Option<&str>) -> Option<LifecycleState> {
    match remote {
        Some("deleted") => None,
        Some("pending_review") | Some("draft") => Some(LifecycleState::Draft),
        _ => Some(LifecycleState::Published),
    }
}

fn ignored(reason: impl Into<String>) -> SyncOutcome {
    SyncOutcome::Ignored { reason: reason.into() }
}

fn request_key(peer_id: &str, key: &str) -> String {
    format!("{}:request:{}", peer_id, key)
}

/// A change after unframing
#[derive(Debug)]
struct Incoming {
    kind: EntityKind,
    uri: String,
    fields: Map<String, Value>,
    lifecycle: Option<LifecycleState>,
    superseded_by: Option<String>,
}

fn parse_change(change: &PeerChange) -> std::result::Result<Incoming, String> {
    let Unframed { type_name, id, mut fields } =
        linked_data::unframe(&change.snapshot).map_err(|e| format!("invalid snapshot: {}", e))?;
    let kind = EntityKind::from_type_name(&type_name)
        .ok_or_else(|| format!("unsupported entity type '{}'", type_name))?;

    let lifecycle = map_lifecycle(fields.remove(LIFECYCLE_FIELD).as_ref().and_then(Value::as_str));
    let superseded_by = fields
        .remove(SUPERSEDED_BY_FIELD)
        .and_then(|v| v.as_str().map(str::to_string));

    Ok(Incoming {
        kind,
        uri: id,
        fields,
        lifecycle,
        superseded_by,
    })
}

/// Repair a replicated event the way local submissions are repaired.
///
/// Returns the normalized fields and whether any repair needs a reviewer.
fn normalize_event_fields(fields: &Map<String, Value>) -> Result<(Map<String, Value>, bool)> {
    let original = EventDraft::resolve(&input_from_fields(fields)?)?;
    let Normalized { draft, .. } = normalize(&original);
    let needs_review = requires_review(&classify(&original, &draft));
    Ok((draft.to_fields()?, needs_review))
}

pub struct FederationSync {
    store: Store,
    base_url: String,
    retention: Duration,
}

impl FederationSync {
    pub fn new(store: Store, base_url: impl Into<String>, retention_hours: i64) -> Self {
        Self {
            store,
            base_url: base_url.into(),
            retention: Duration::hours(retention_hours.max(1)),
        }
    }

    pub async fn register_peer(
        &self,
        peer_id: &str,
        node_domain: &str,
        base_url: &str,
        trust_level: u8,
        sync_enabled: bool,
    ) -> Result<FederationNode> {
        if peer_id.trim().is_empty() {
            return Err(Error::validation("peerId", "is required"));
        }
        retry_on_lock("register_peer", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("register_peer").await?;
            let node = nodes::upsert_node(
                tx.conn(),
                peer_id,
                node_domain,
                base_url,
                trust_level,
                sync_enabled,
                Utc::now(),
            )
            .await?;
            tx.commit().await?;
            info!(peer_id, node_domain, trust_level = node.trust_level, "Federation peer registered");
            Ok(node)
        })
        .await
    }

    pub async fn list_peers(&self) -> Result<Vec<FederationNode>> {
        let mut conn = self.store.read().await?;
        nodes::list_nodes(&mut conn).await
    }

    /// Apply a push from `peer_id`.
    ///
    /// With a request-level `idempotency_key`, a retried push returns the
    /// stored response; the same key with a different body is a conflict.
    pub async fn sync(
        &self,
        peer_id: &str,
        changes: &[PeerChange],
        idempotency_key: Option<&str>,
    ) -> Result<SyncResult> {
        let node = {
            let mut conn = self.store.read().await?;
            nodes::get_node(&mut conn, peer_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("federation peer {}", peer_id)))?
        };
        if !node.sync_enabled {
            return Err(Error::InvalidInput(format!("sync is disabled for peer {}", peer_id)));
        }

        let request_hash = fingerprint(&serde_json::to_value(changes)?);
        let request_key = idempotency_key.map(|k| request_key(peer_id, k));

        if let Some(key) = &request_key {
            let mut conn = self.store.read().await?;
            if let Some(cached) = idempotency::get(&mut conn, key).await? {
                if cached.request_hash != request_hash {
                    return Err(Error::Conflict(format!(
                        "idempotency key '{}' was already used with a different request",
                        idempotency_key.unwrap_or_default()
                    )));
                }
                let mut result: SyncResult = serde_json::from_str(&cached.result)?;
                result.replayed = true;
                debug!(peer_id, key = %key, "Replaying cached sync response");
                return Ok(result);
            }
        }

        let mut results = Vec::with_capacity(changes.len());
        for change in changes {
            results.push(self.apply_one(&node, change).await?);
        }

        let max_sequence = changes.iter().map(|c| c.sequence_number).max();
        let result = retry_on_lock("sync_finish", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("sync_finish").await?;
            if let Some(seq) = max_sequence {
                nodes::record_sync(tx.conn(), peer_id, seq, now).await?;
            }
            let cursor = nodes::get_node(tx.conn(), peer_id)
                .await?
                .map_or(node.last_synced_cursor, |n| n.last_synced_cursor);

            let result = SyncResult {
                peer_id: peer_id.to_string(),
                results: results.clone(),
                cursor,
                replayed: false,
            };
            if let Some(key) = &request_key {
                idempotency::put(
                    tx.conn(),
                    key,
                    peer_id,
                    &request_hash,
                    &serde_json::to_string(&result)?,
                    now,
                )
                .await?;
            }
            tx.commit().await?;
            Ok(result)
        })
        .await;

        match result {
            Ok(result) => {
                info!(peer_id, changes = changes.len(), cursor = result.cursor, "Sync applied");
                Ok(result)
            }
            // A concurrent retry stored the response first; serve that one
            Err(Error::Conflict(_)) if request_key.is_some() => {
                let mut conn = self.store.read().await?;
                let key = request_key.as_deref().unwrap_or_default();
                let cached = idempotency::get(&mut conn, key)
                    .await?
                    .ok_or_else(|| Error::Conflict(format!("idempotency key {} vanished", key)))?;
                let mut result: SyncResult = serde_json::from_str(&cached.result)?;
                result.replayed = true;
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply one change in its own transaction, or return its stored outcome
    async fn apply_one(&self, node: &FederationNode, change: &PeerChange) -> Result<SyncItemResult> {
        let key = change.idempotency_key(&node.peer_id);
        let change_hash = fingerprint(&serde_json::to_value(change)?);

        retry_on_lock("sync_change", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("sync_change").await?;

            if let Some(cached) = idempotency::get(tx.conn(), &key).await? {
                if cached.request_hash != change_hash {
                    warn!(peer_id = %node.peer_id, key = %key, "Sequence number reused for a different change");
                    return Ok(SyncItemResult {
                        idempotency_key: key.clone(),
                        sequence_number: change.sequence_number,
                        outcome: SyncOutcome::Conflict {
                            reason: format!(
                                "sequence {} was already applied with different content",
                                change.sequence_number
                            ),
                        },
                        replayed: false,
                    });
                }
                let outcome: SyncOutcome = serde_json::from_str(&cached.result)?;
                debug!(peer_id = %node.peer_id, key = %key, "Change already applied");
                return Ok(SyncItemResult {
                    idempotency_key: key.clone(),
                    sequence_number: change.sequence_number,
                    outcome,
                    replayed: true,
                });
            }

            let outcome = self.apply_change(tx.conn(), node, change, now).await?;

            idempotency::put(
                tx.conn(),
                &key,
                &node.peer_id,
                &change_hash,
                &serde_json::to_string(&outcome)?,
                now,
            )
            .await?;
            tx.commit().await?;

            Ok(SyncItemResult {
                idempotency_key: key.clone(),
                sequence_number: change.sequence_number,
                outcome,
                replayed: false,
            })
        })
        .await
    }

    async fn apply_change(
        &self,
        conn: &mut SqliteConnection,
        node: &FederationNode,
        change: &PeerChange,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome> {
        let incoming = match parse_change(change) {
            Ok(incoming) => incoming,
            Err(reason) => {
                warn!(peer_id = %node.peer_id, sequence = change.sequence_number, %reason, "Ignoring change");
                return Ok(ignored(reason));
            }
        };

        let is_delete = matches!(change.action, ChangeAction::Delete | ChangeAction::Merge)
            || incoming.lifecycle.is_none();

        // Our own entity echoed back by a peer
        if let Some((collection, id)) = linked_data::parse_local_uri(&self.base_url, &incoming.uri) {
            let local = match (EntityKind::from_collection(collection), Uuid::parse_str(id)) {
                (Some(_), Ok(id)) => entities::get_entity(conn, id).await?,
                _ => None,
            };
            let Some(local) = local else {
                return Ok(ignored("unknown local entity"));
            };
            if is_delete {
                return Ok(ignored("entity is owned by this node"));
            }
            self.record_source(conn, node, local.id, change, now).await?;
            debug!(entity_id = %local.id, peer_id = %node.peer_id, "Peer change kept as source record");
            return Ok(SyncOutcome::SourceRecorded { entity_id: local.id });
        }

        if let Some(tombstone) = tombstones::find_by_uri(conn, &incoming.uri).await? {
            let reason = if is_delete { "already deleted" } else { "entity was deleted" };
            debug!(uri = %incoming.uri, tombstone_id = tombstone.id, reason, "Ignoring change for tombstoned entity");
            return Ok(ignored(reason));
        }

        let existing = entities::find_by_federation_uri(conn, &incoming.uri).await?;

        if is_delete {
            return match existing {
                Some(mut entity) => {
                    entity.remote_sequence = Some(change.sequence_number);
                    tombstones::soft_delete(
                        conn,
                        &mut entity,
                        reasons::FEDERATED_DELETE,
                        incoming.superseded_by.as_deref(),
                        &self.base_url,
                        now,
                    )
                    .await?;
                    info!(entity_id = %entity.id, uri = %incoming.uri, "Federated delete applied");
                    Ok(SyncOutcome::Deleted { entity_id: entity.id })
                }
                None => {
                    tombstones::insert_tombstone(
                        conn,
                        None,
                        &incoming.uri,
                        incoming.kind,
                        reasons::FEDERATED_DELETE,
                        incoming.superseded_by.as_deref(),
                        Some(&change.snapshot),
                        now,
                    )
                    .await?;
                    Ok(ignored("entity never stored here; tombstone recorded"))
                }
            };
        }

        let mut lifecycle = incoming.lifecycle.unwrap_or(LifecycleState::Published);
        let mut fields = incoming.fields.clone();
        if incoming.kind == EntityKind::Event {
            match normalize_event_fields(&fields) {
                Ok((normalized, needs_review)) => {
                    fields = normalized;
                    // A low-confidence date repair is never published unseen
                    if needs_review && lifecycle == LifecycleState::Published {
                        warn!(
                            uri = %incoming.uri,
                            peer_id = %node.peer_id,
                            "Replicated event needed a doubtful date repair; holding it as draft"
                        );
                        lifecycle = LifecycleState::Draft;
                    }
                }
                Err(e) => return Ok(ignored(format!("invalid snapshot: {}", e))),
            }
        }

        match existing {
            Some(mut entity) => {
                if entity.kind != incoming.kind {
                    return Ok(ignored(format!(
                        "type changed from {} to {}",
                        entity.kind.type_name(),
                        incoming.kind.type_name()
                    )));
                }
                if let Some(applied) = entity.remote_sequence {
                    if applied >= change.sequence_number {
                        return Ok(ignored(format!("stale: sequence {} already applied", applied)));
                    }
                }

                if let Err(e) = reproject(&mut entity, fields.clone()) {
                    return Ok(ignored(format!("invalid snapshot: {}", e)));
                }
                entity.lifecycle_state = lifecycle;
                entity.remote_sequence = Some(change.sequence_number);
                entity.updated_at = now;
                entities::update_entity(conn, &entity).await?;

                self.record_source(conn, node, entity.id, change, now).await?;
                let changed = if change.changed_fields.is_empty() {
                    fields.keys().cloned().collect()
                } else {
                    change.changed_fields.clone()
                };
                changes::append_change(conn, &entity, ChangeAction::Update, &changed, None, &self.base_url, now)
                    .await?;
                Ok(SyncOutcome::Updated { entity_id: entity.id })
            }
            None => {
                let name = fields
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut entity = CanonicalEntity::new(incoming.kind, name, Map::new(), now);
                if let Err(e) = reproject(&mut entity, fields.clone()) {
                    return Ok(ignored(format!("invalid snapshot: {}", e)));
                }
                entity.lifecycle_state = lifecycle;
                entity.federation_uri = Some(incoming.uri.clone());
                entity.origin_peer = Some(node.peer_id.clone());
                entity.remote_sequence = Some(change.sequence_number);
                entities::insert_entity(conn, &entity).await?;

                self.record_source(conn, node, entity.id, change, now).await?;
                let changed: Vec<String> = fields.keys().cloned().collect();
                changes::append_change(conn, &entity, ChangeAction::Create, &changed, None, &self.base_url, now)
                    .await?;
                info!(entity_id = %entity.id, uri = %incoming.uri, peer_id = %node.peer_id, "Federated entity created");
                Ok(SyncOutcome::Created { entity_id: entity.id })
            }
        }
    }

    /// Keep the peer's snapshot as a source record with field provenance at
    /// the peer's trust level. Provenance only marks fields applied when the
    /// entity is replicated from that peer.
    async fn record_source(
        &self,
        conn: &mut SqliteConnection,
        node: &FederationNode,
        entity_id: Uuid,
        change: &PeerChange,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let source = SourceMeta::new(format!("peer:{}", node.peer_id), node.trust_level)
            .with_producer(ProducerKind::Federation)
            .with_external_id(change.sequence_number.to_string());
        let hash = fingerprint(&change.snapshot);

        if let Some(existing) = provenance::find_by_hash(conn, &source.source_id, &hash).await? {
            provenance::reassign_source_record(conn, existing.id, entity_id, now).await?;
            return Ok(());
        }

        let record_id =
            provenance::insert_source_record(conn, entity_id, &source, &change.snapshot, &hash, now).await?;

        let owned_by_peer = entities::get_entity(conn, entity_id)
            .await?
            .is_some_and(|e| e.origin_peer.as_deref() == Some(node.peer_id.as_str()));
        let fields = match &change.snapshot {
            Value::Object(map) => map
                .iter()
                .filter(|(k, _)| !linked_data::FRAME_KEYS.contains(&k.as_str()) && *k != LIFECYCLE_FIELD)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Map::new(),
        };
        let units = merge_units(&fields);
        let observations: Vec<FieldObservation<'_>> = units
            .iter()
            .map(|(field, value)| FieldObservation {
                field_path: field.as_str(),
                value_hash: fingerprint(value),
                confidence: 1.0,
                applied: owned_by_peer,
            })
            .collect();
        provenance::record_fields(conn, entity_id, record_id, node.trust_level, &observations, now).await
    }

    /// Drop idempotency records older than the retention window
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.retention;
        let purged = retry_on_lock("idempotency_cleanup", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("idempotency_cleanup").await?;
            let purged = idempotency::purge_older_than(tx.conn(), cutoff).await?;
            tx.commit().await?;
            Ok(purged)
        })
        .await?;

        if purged > 0 {
            info!(purged, "Purged expired sync idempotency keys");
        }
        Ok(purged)
    }
}

/// A change with no changed-field list, as sent by peers that omit it
pub fn peer_change(sequence_number: i64, action: ChangeAction, snapshot: Value) -> PeerChange {
    PeerChange {
        sequence_number,
        action,
        changed_fields: Vec::new(),
        snapshot,
    }
}
