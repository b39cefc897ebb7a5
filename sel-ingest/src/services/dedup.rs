//! Similarity / dedup engine
//!
//! Layers run cheapest first and the first match wins:
//! 1. exact hash (handled by the coordinator against `source_records`)
//! 2. near-duplicate events by trigram similarity inside a date window
//! 3. fuzzy place/organization matching by name and locality
//! 4. admin-triggered merge of two canonical entities

use chrono::{DateTime, Duration, Utc};
use sel_common::config::DedupConfig;
use sel_common::linked_data::fingerprint;
use sel_common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use std::cmp::Ordering;
use tracing::{debug, info};
use uuid::Uuid;

use super::similarity::{entity_similarity, event_similarity};
use crate::db::provenance::{self, FieldObservation};
use crate::db::{changes, duplicates, entities, review, tombstones, Store};
use crate::models::feed::reasons;
use crate::models::payload::input_from_fields;
use crate::models::{
    CanonicalEntity, ChangeAction, EntityKind, EventDraft, OrganizationInput, PlaceInput,
    ReviewAction,
};

/// A stored event resembling a submission
#[derive(Debug, Clone)]
pub struct EventMatch {
    pub entity: CanonicalEntity,
    pub score: f64,
    pub source_count: i64,
}

/// Result of fuzzy place/organization matching
#[derive(Debug, Clone)]
pub enum EntityResolution {
    /// Reuse this record
    Matched { entity: CanonicalEntity, score: f64 },
    /// Create a new record; `similar` is the best candidate worth an admin look
    New { similar: Option<(Uuid, f64)> },
}

/// What an admin merge did
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub winner_id: Uuid,
    pub loser_id: Uuid,
    /// Fields the winner took from the loser because it had none
    pub adopted_fields: Vec<String>,
    pub moved_source_records: u64,
    /// Events whose venue or organizer now points at the winner
    pub repointed_events: Vec<Uuid>,
    pub merge_sequence: i64,
    pub update_sequence: i64,
}

/// Score desc, then more corroborating sources, then most recently updated
fn rank(a: &EventMatch, b: &EventMatch) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(b.source_count.cmp(&a.source_count))
        .then(b.entity.updated_at.cmp(&a.entity.updated_at))
}

/// Event keys that only make sense together
const SCHEDULE_KEYS: [&str; 3] = ["startDate", "endDate", "occurrences"];
const SCHEDULE_UNIT: &str = "schedule";

/// Split fields into merge units: each key on its own, except the schedule
/// keys which travel as one `schedule` object so a single range never mixes
/// with an occurrence list.
pub(crate) fn merge_units(fields: &Map<String, Value>) -> Map<String, Value> {
    let mut units = Map::new();
    let mut schedule = Map::new();
    for (key, value) in fields {
        if SCHEDULE_KEYS.contains(&key.as_str()) {
            schedule.insert(key.clone(), value.clone());
        } else {
            units.insert(key.clone(), value.clone());
        }
    }
    if !schedule.is_empty() {
        units.insert(SCHEDULE_UNIT.to_string(), Value::Object(schedule));
    }
    units
}

fn from_units(units: Map<String, Value>) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, value) in units {
        match (key.as_str(), value) {
            (SCHEDULE_UNIT, Value::Object(schedule)) => fields.extend(schedule),
            (_, value) => {
                fields.insert(key, value);
            }
        }
    }
    fields
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        _ => false,
    }
}

/// Re-derive an entity's projected columns after its `fields` changed
pub fn reproject(entity: &mut CanonicalEntity, fields: Map<String, Value>) -> Result<()> {
    match entity.kind {
        EntityKind::Event => {
            let draft = EventDraft::resolve(&input_from_fields(&fields)?)?;
            entity.set_event(&draft)?;
        }
        EntityKind::Place => {
            let place: PlaceInput = serde_json::from_value(Value::Object(fields))?;
            entity.set_place(&place)?;
        }
        EntityKind::Organization => {
            let org: OrganizationInput = serde_json::from_value(Value::Object(fields))?;
            entity.set_organization(&org)?;
        }
    }
    Ok(())
}

pub struct DedupEngine {
    config: DedupConfig,
    base_url: String,
}

impl DedupEngine {
    pub fn new(config: DedupConfig, base_url: impl Into<String>) -> Self {
        Self {
            config,
            base_url: base_url.into(),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Layer 2: stored events within the date window scoring at or above the
    /// surfacing threshold, best first.
    pub async fn near_duplicates(
        &self,
        conn: &mut SqliteConnection,
        draft: &EventDraft,
        exclude: Option<Uuid>,
    ) -> Result<Vec<EventMatch>> {
        let start = draft.schedule.effective_start();
        let window = Duration::hours(self.config.date_window_hours);
        let candidates = entities::find_events_in_window(conn, start - window, start + window).await?;

        let mut matches = Vec::new();
        for entity in candidates {
            if Some(entity.id) == exclude {
                continue;
            }
            let venue = input_from_fields(&entity.fields)
                .ok()
                .and_then(|input| input.location.map(|p| p.name))
                .unwrap_or_default();
            let score = event_similarity(&draft.name, draft.venue_name(), &entity.name, &venue);
            if score < self.config.near_duplicate_threshold {
                continue;
            }
            let source_count = entities::count_sources(conn, entity.id).await?;
            matches.push(EventMatch {
                entity,
                score,
                source_count,
            });
        }

        matches.sort_by(rank);
        Ok(matches)
    }

    /// True when a match is strong enough to fold the submission into it
    pub fn is_auto_merge(&self, m: &EventMatch) -> bool {
        m.score >= self.config.auto_merge_threshold
    }

    /// Layer 3: reuse an existing place/organization or decide to create one
    pub async fn resolve_entity(
        &self,
        conn: &mut SqliteConnection,
        kind: EntityKind,
        name: &str,
        locality: Option<&str>,
    ) -> Result<EntityResolution> {
        let normalized = entities::normalize_name(name);
        let candidates = entities::find_named_candidates(conn, kind, &normalized, locality).await?;

        let mut scored = Vec::with_capacity(candidates.len());
        for entity in candidates {
            let score = entity_similarity(
                &normalized,
                locality,
                &entities::normalize_name(&entity.name),
                entity.locality.as_deref(),
            );
            let source_count = entities::count_sources(conn, entity.id).await?;
            scored.push(EventMatch {
                entity,
                score,
                source_count,
            });
        }
        scored.sort_by(rank);

        match scored.into_iter().next() {
            Some(best) if best.score >= self.config.entity_match_threshold => {
                Ok(EntityResolution::Matched {
                    entity: best.entity,
                    score: best.score,
                })
            }
            Some(best) if best.score >= self.config.entity_review_threshold => Ok(EntityResolution::New {
                similar: Some((best.entity.id, best.score)),
            }),
            _ => Ok(EntityResolution::New { similar: None }),
        }
    }

    /// Most-trusted-wins merge of `incoming` into `existing`.
    ///
    /// A field is applied when the canonical value is empty or the incoming
    /// trust beats the trust behind the applied value. Every observation is
    /// recorded. Returns the names of applied fields; `existing` is updated in
    /// memory and the caller persists it.
    pub async fn merge_fields(
        &self,
        conn: &mut SqliteConnection,
        existing: &mut CanonicalEntity,
        incoming: &Map<String, Value>,
        source_record_id: i64,
        trust_level: u8,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let current_units = merge_units(&existing.fields);
        let incoming_units = merge_units(incoming);
        let mut merged = current_units.clone();
        let mut applied_fields = Vec::new();
        let mut observations = Vec::with_capacity(incoming_units.len());

        for (field, value) in &incoming_units {
            let current = current_units.get(field);
            let applied = if is_empty_value(current) {
                true
            } else if current == Some(value) {
                false
            } else {
                let held_by = provenance::applied_trust(conn, existing.id, field)
                    .await?
                    .unwrap_or(0);
                trust_level > held_by
            };

            if applied {
                merged.insert(field.clone(), value.clone());
                applied_fields.push(field.clone());
            }
            observations.push(FieldObservation {
                field_path: field.as_str(),
                value_hash: fingerprint(value),
                confidence: 1.0,
                applied,
            });
        }

        provenance::record_fields(conn, existing.id, source_record_id, trust_level, &observations, now)
            .await?;

        if !applied_fields.is_empty() {
            reproject(existing, from_units(merged))?;
            existing.updated_at = now;
        }
        Ok(applied_fields)
    }

    /// Layer 4: fold `loser` into `winner`.
    ///
    /// The winner adopts every field it lacks, inherits the loser's source
    /// records and provenance, and takes over venue/organizer references. The
    /// loser is tombstoned with `supersededBy` pointing at the winner.
    pub async fn merge(&self, store: &Store, winner_id: Uuid, loser_id: Uuid, now: DateTime<Utc>) -> Result<MergeOutcome> {
        if winner_id == loser_id {
            return Err(Error::validation("loserId", "cannot merge an entity into itself"));
        }

        let mut tx = store.begin_write("dedup_merge").await?;

        let mut winner = entities::require_entity(tx.conn(), winner_id).await?;
        let mut loser = entities::require_entity(tx.conn(), loser_id).await?;
        if winner.kind != loser.kind {
            return Err(Error::validation(
                "loserId",
                format!("cannot merge a {} into a {}", loser.kind, winner.kind),
            ));
        }
        if winner.is_deleted() || loser.is_deleted() {
            return Err(Error::Conflict("cannot merge a deleted entity".to_string()));
        }

        let mut adopted_fields = Vec::new();
        let mut units = merge_units(&winner.fields);
        for (field, value) in merge_units(&loser.fields) {
            if is_empty_value(units.get(&field)) && !is_empty_value(Some(&value)) {
                units.insert(field.clone(), value);
                adopted_fields.push(field);
            }
        }
        if !adopted_fields.is_empty() {
            reproject(&mut winner, from_units(units))?;
        }
        if winner.latitude.is_none() && loser.latitude.is_some() {
            winner.latitude = loser.latitude;
            winner.longitude = loser.longitude;
        }
        winner.updated_at = now;
        entities::update_entity(tx.conn(), &winner).await?;

        let moved_source_records = provenance::reparent(tx.conn(), loser.id, winner.id, &adopted_fields).await?;
        let repointed_events = entities::repoint_references(tx.conn(), loser.id, winner.id).await?;

        if let Some(pending) = review::pending_for_entity(tx.conn(), loser.id).await? {
            let next = pending.status.apply(ReviewAction::Supersede)?;
            review::close_entry(
                tx.conn(),
                pending.id,
                next,
                &review::Decision {
                    notes: Some("merged into another entity"),
                    ..Default::default()
                },
                now,
            )
            .await?;
        }

        let winner_uri = winner.uri(&self.base_url);
        let merge_sequence = tombstones::soft_delete(
            tx.conn(),
            &mut loser,
            reasons::DUPLICATE_MERGED,
            Some(&winner_uri),
            &self.base_url,
            now,
        )
        .await?;

        let mut changed = adopted_fields.clone();
        changed.push("sources".to_string());
        let update_sequence = changes::append_change(
            tx.conn(),
            &winner,
            ChangeAction::Update,
            &changed,
            None,
            &self.base_url,
            now,
        )
        .await?;

        duplicates::mark_merged(tx.conn(), winner.id, loser.id).await?;

        tx.commit().await?;

        info!(
            winner_id = %winner.id,
            loser_id = %loser.id,
            adopted = adopted_fields.len(),
            moved_source_records,
            "Entities merged"
        );
        if !repointed_events.is_empty() {
            debug!(
                loser_id = %loser.id,
                events = repointed_events.len(),
                "Venue/organizer references repointed to merge winner"
            );
        }

        Ok(MergeOutcome {
            winner_id: winner.id,
            loser_id: loser.id,
            adopted_fields,
            moved_source_records,
            repointed_events,
            merge_sequence,
            update_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_keys_merge_as_one_unit() {
        let fields = json!({"name": "Jazz", "startDate": "2026-04-01T19:00:00Z", "endDate": "2026-04-01T22:00:00Z"});
        let units = merge_units(fields.as_object().unwrap());
        assert_eq!(units.len(), 2);
        assert_eq!(
            units["schedule"],
            json!({"startDate": "2026-04-01T19:00:00Z", "endDate": "2026-04-01T22:00:00Z"})
        );
        assert_eq!(Value::Object(from_units(units)), fields);
    }

    #[test]
    fn empty_values() {
        assert!(is_empty_value(None));
        assert!(is_empty_value(Some(&json!("  "))));
        assert!(is_empty_value(Some(&json!([]))));
        assert!(!is_empty_value(Some(&json!(0))));
    }
}
