//! Ingestion coordinator
//!
//! `ingest` runs a submission through resolve → normalize → validate → dedup
//! and then performs every write (canonical entity, source record, field
//! provenance, review entry, change feed entry) in one transaction. Enrichment
//! jobs are enqueued only after that transaction commits, and the outcome
//! never depends on them.

use chrono::{DateTime, Utc};
use sel_common::linked_data::{self, fingerprint};
use sel_common::{Error, Result};
use serde_json::{json, Map, Value};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dedup::{merge_units, DedupEngine, EntityResolution, EventMatch};
use super::normalizer::{normalize, Normalized};
use super::review_queue::ReviewQueue;
use super::validator::Validator;
use crate::db::duplicates::{self, CandidateLayer};
use crate::db::provenance::{self, FieldObservation};
use crate::db::review::{self, Decision, NewReviewEntry};
use crate::db::{changes, entities, tombstones, Store};
use crate::jobs::{JobRunner, JobType};
use crate::models::feed::reasons;
use crate::models::provenance::clamp_trust;
use crate::models::{
    codes, requires_review, CanonicalEntity, ChangeAction, Disposition, EntityKind, EventDraft,
    EventInput, IngestOutcome, IngestStatus, LifecycleState, ReviewAction, ReviewEntry,
    ReviewStatus, SourceMeta, SourceRecord, Warning,
};
use crate::utils::retry_on_lock;

/// A submission after resolve, normalize and validate
#[derive(Debug, Clone)]
pub struct PreparedEvent {
    pub original: EventDraft,
    pub normalized: EventDraft,
    pub warnings: Vec<Warning>,
    /// Normalized payload as stored on the canonical entity
    pub fields: Map<String, Value>,
    pub payload_hash: String,
    pub dedup_key: String,
}

/// Resolve, normalize and validate. Fails only on unparsable input.
pub fn prepare_event(input: &EventInput, validator: &Validator, now: DateTime<Utc>) -> Result<PreparedEvent> {
    let original = EventDraft::resolve(input)?;
    let Normalized { draft: normalized, .. } = normalize(&original);
    let warnings = validator.validate(&original, &normalized, now);

    let fields = normalized.to_fields()?;
    let payload_hash = fingerprint(&Value::Object(fields.clone()));
    let dedup_key = linked_data::dedup_key(
        &normalized.name,
        normalized.venue_name(),
        &normalized.schedule.effective_start(),
    );

    Ok(PreparedEvent {
        original,
        normalized,
        warnings,
        fields,
        payload_hash,
        dedup_key,
    })
}

/// Parse a raw submission body into the wire shape
pub fn parse_payload(payload: &Value) -> Result<EventInput> {
    if !payload.is_object() {
        return Err(Error::validation("payload", "must be a JSON object"));
    }
    serde_json::from_value(payload.clone()).map_err(|e| Error::validation("payload", e.to_string()))
}

/// Warning codes compared against a past rejection. Duplicate surfacing
/// depends on what else is stored at the time, so it is left out.
fn rejection_codes(warnings: &[Warning]) -> BTreeSet<&str> {
    warnings
        .iter()
        .map(|w| w.code.as_str())
        .filter(|code| *code != codes::POTENTIAL_DUPLICATE)
        .collect()
}

fn previously_rejected(entry: &ReviewEntry) -> Error {
    Error::PreviouslyRejected {
        review_id: entry.id,
        reason: entry.rejection_reason.clone().unwrap_or_default(),
        reviewed_by: entry.reviewed_by.clone().unwrap_or_default(),
        reviewed_at: entry.reviewed_at.unwrap_or(entry.updated_at),
    }
}

fn observations(fields: &Map<String, Value>) -> Vec<(String, String)> {
    merge_units(fields)
        .iter()
        .map(|(field, value)| (field.clone(), fingerprint(value)))
        .collect()
}

/// Everything a committed ingest leaves for after the transaction
struct Committed {
    outcome: IngestOutcome,
    new_places: Vec<Uuid>,
}

pub struct IngestCoordinator {
    store: Store,
    validator: Validator,
    dedup: Arc<DedupEngine>,
    review: Arc<ReviewQueue>,
    jobs: Arc<dyn JobRunner>,
    base_url: String,
}

impl IngestCoordinator {
    pub fn new(
        store: Store,
        validator: Validator,
        dedup: Arc<DedupEngine>,
        review: Arc<ReviewQueue>,
        jobs: Arc<dyn JobRunner>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            validator,
            dedup,
            review,
            jobs,
            base_url: base_url.into(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ingest one submission.
    ///
    /// Returns `Published` or `Queued`; a resubmission blocked by a past
    /// rejection fails with `PreviouslyRejected`, unparsable input with
    /// `Validation`.
    pub async fn ingest(&self, payload: &Value, source: &SourceMeta) -> Result<IngestOutcome> {
        let input = parse_payload(payload)?;
        let now = Utc::now();
        let prepared = prepare_event(&input, &self.validator, now)?;

        let mut source = source.clone();
        source.trust_level = clamp_trust(source.trust_level);

        let result = retry_on_lock("ingest", self.store.max_lock_wait_ms(), || async {
            self.ingest_once(payload, &prepared, &source, now).await
        })
        .await;

        let committed = match result {
            Ok(committed) => committed,
            Err(Error::Conflict(msg)) => {
                // A concurrent submission of the same thing won; report its result
                debug!(source_id = %source.source_id, %msg, "Ingest lost a race, reading winner");
                return self.existing_outcome(&prepared, &source).await;
            }
            Err(e) => return Err(e),
        };

        for place_id in &committed.new_places {
            if let Err(e) = self
                .jobs
                .enqueue(JobType::GeocodePlace, json!({ "place_id": place_id }))
                .await
            {
                warn!(place_id = %place_id, error = %e, "Failed to enqueue geocoding");
            }
        }

        Ok(committed.outcome)
    }

    async fn ingest_once(
        &self,
        payload: &Value,
        prepared: &PreparedEvent,
        source: &SourceMeta,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let mut tx = self.store.begin_write("ingest").await?;

        // Layer 1: exact hash from the same source, re-checked inside the transaction
        let replayed_record =
            provenance::find_by_hash(tx.conn(), &source.source_id, &prepared.payload_hash).await?;
        if let Some(record) = &replayed_record {
            let entity = entities::require_entity(tx.conn(), record.entity_id).await?;
            if !entity.is_deleted() {
                provenance::touch_source_record(tx.conn(), record.id, now).await?;
                let outcome = self.prior_outcome(tx.conn(), &entity, prepared).await?;
                tx.commit().await?;
                debug!(entity_id = %entity.id, source_id = %source.source_id, "Identical resubmission");
                return Ok(Committed {
                    outcome,
                    new_places: Vec::new(),
                });
            }
            if let Some(rejected) =
                review::latest_for_entity(tx.conn(), entity.id, ReviewStatus::Rejected).await?
            {
                if rejected.rejection_still_applies(now) {
                    return Err(previously_rejected(&rejected));
                }
            }
        }

        let source_key = source.source_key();

        // Past rejection of the same content from any source
        if let Some(rejected) = review::find_by_keys(
            tx.conn(),
            Some(&prepared.dedup_key),
            source_key.as_deref(),
            ReviewStatus::Rejected,
        )
        .await?
        {
            if rejected.rejection_still_applies(now)
                && rejection_codes(&rejected.warnings) == rejection_codes(&prepared.warnings)
            {
                info!(
                    review_id = rejected.id,
                    source_id = %source.source_id,
                    "Resubmission matches a rejected entry"
                );
                return Err(previously_rejected(&rejected));
            }
        }

        // Resubmission of something still waiting for a reviewer
        if let Some(pending) = review::find_by_keys(
            tx.conn(),
            Some(&prepared.dedup_key),
            source_key.as_deref(),
            ReviewStatus::Pending,
        )
        .await?
        {
            let committed = self
                .resubmit(tx.conn(), &pending, payload, prepared, source, replayed_record.as_ref(), now)
                .await?;
            tx.commit().await?;
            return Ok(committed);
        }

        // Layer 2: near-duplicate events
        let matches = self.dedup.near_duplicates(tx.conn(), &prepared.normalized, None).await?;
        let mut warnings = prepared.warnings.clone();

        if let Some(best) = matches.first() {
            if self.dedup.is_auto_merge(best)
                && best.entity.lifecycle_state == LifecycleState::Published
                && !requires_review(&warnings)
            {
                let committed = self
                    .merge_into(tx.conn(), best, payload, prepared, source, replayed_record.as_ref(), now)
                    .await?;
                tx.commit().await?;
                return Ok(committed);
            }
        }
        if !matches.is_empty() {
            warnings.push(Warning::low(
                "name",
                codes::POTENTIAL_DUPLICATE,
                format!(
                    "Potential duplicate: found {} similar event(s) near the same date",
                    matches.len()
                ),
            ));
        }

        let committed = self
            .create(tx.conn(), payload, prepared, warnings, &matches, source, replayed_record.as_ref(), now)
            .await?;
        tx.commit().await?;

        info!(
            entity_id = %committed.outcome.entity_id,
            status = ?committed.outcome.status,
            warnings = committed.outcome.warnings.len(),
            "Event ingested"
        );
        Ok(committed)
    }

    /// Result reported for an identical resubmission
    async fn prior_outcome(
        &self,
        conn: &mut SqliteConnection,
        entity: &CanonicalEntity,
        prepared: &PreparedEvent,
    ) -> Result<IngestOutcome> {
        let pending = review::pending_for_entity(conn, entity.id).await?;
        Ok(match pending {
            Some(entry) => IngestOutcome {
                status: IngestStatus::Queued,
                entity_id: entity.id,
                review_id: Some(entry.id),
                warnings: entry.warnings,
                disposition: Disposition::Unchanged,
            },
            None => IngestOutcome {
                status: IngestStatus::Published,
                entity_id: entity.id,
                review_id: None,
                warnings: prepared.warnings.clone(),
                disposition: Disposition::Unchanged,
            },
        })
    }

    /// Read the stored result after losing a uniqueness race
    async fn existing_outcome(&self, prepared: &PreparedEvent, source: &SourceMeta) -> Result<IngestOutcome> {
        let mut conn = self.store.read().await?;

        if let Some(record) = provenance::find_by_hash(&mut conn, &source.source_id, &prepared.payload_hash).await? {
            let entity = entities::require_entity(&mut conn, record.entity_id).await?;
            return self.prior_outcome(&mut conn, &entity, prepared).await;
        }

        if let Some(pending) = review::find_by_keys(
            &mut conn,
            Some(&prepared.dedup_key),
            source.source_key().as_deref(),
            ReviewStatus::Pending,
        )
        .await?
        {
            return Ok(IngestOutcome {
                status: IngestStatus::Queued,
                entity_id: pending.entity_id,
                review_id: Some(pending.id),
                warnings: pending.warnings,
                disposition: Disposition::Unchanged,
            });
        }

        Err(Error::Conflict(
            "submission conflicted with a concurrent write that is no longer visible".to_string(),
        ))
    }

    /// Store the source record for `entity_id`, reusing a replayed one
    async fn attach_source(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        payload: &Value,
        prepared: &PreparedEvent,
        source: &SourceMeta,
        replayed: Option<&SourceRecord>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        match replayed {
            Some(record) => {
                provenance::reassign_source_record(conn, record.id, entity_id, now).await?;
                Ok(record.id)
            }
            None => {
                provenance::insert_source_record(conn, entity_id, source, payload, &prepared.payload_hash, now)
                    .await
            }
        }
    }

    /// Record every field of a submission as applied to `entity_id`
    async fn record_all_fields(
        &self,
        conn: &mut SqliteConnection,
        entity_id: Uuid,
        source_record_id: i64,
        prepared: &PreparedEvent,
        source: &SourceMeta,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let hashes = observations(&prepared.fields);
        let obs: Vec<FieldObservation<'_>> = hashes
            .iter()
            .map(|(field, hash)| FieldObservation {
                field_path: field.as_str(),
                value_hash: hash.clone(),
                confidence: 1.0,
                applied: true,
            })
            .collect();
        provenance::record_fields(conn, entity_id, source_record_id, source.trust_level, &obs, now).await
    }

    /// A resubmission matching a pending entry updates it, or supersedes it
    /// when nothing needs review any more.
    #[allow(clippy::too_many_arguments)]
    async fn resubmit(
        &self,
        conn: &mut SqliteConnection,
        pending: &ReviewEntry,
        payload: &Value,
        prepared: &PreparedEvent,
        source: &SourceMeta,
        replayed: Option<&SourceRecord>,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let mut entity = entities::require_entity(conn, pending.entity_id).await?;
        entity.set_event(&prepared.normalized)?;
        entity.updated_at = now;
        let new_places = self.link_references(conn, &prepared.normalized, &mut entity, source, now).await?;

        let record_id = self
            .attach_source(conn, entity.id, payload, prepared, source, replayed, now)
            .await?;
        self.record_all_fields(conn, entity.id, record_id, prepared, source, now).await?;

        let changed: Vec<String> = prepared.fields.keys().cloned().collect();

        if requires_review(&prepared.warnings) {
            review::update_pending(
                conn,
                pending.id,
                &NewReviewEntry {
                    entity_id: entity.id,
                    original_payload: payload.clone(),
                    normalized_payload: Value::Object(prepared.fields.clone()),
                    warnings: prepared.warnings.clone(),
                    dedup_key: Some(prepared.dedup_key.clone()),
                    source_key: source.source_key(),
                    payload_hash: prepared.payload_hash.clone(),
                    effective_start: entity.start_time,
                    effective_end: entity.end_time,
                },
                now,
            )
            .await?;
            entities::update_entity(conn, &entity).await?;
            changes::append_change(conn, &entity, ChangeAction::Update, &changed, None, &self.base_url, now)
                .await?;

            debug!(review_id = pending.id, entity_id = %entity.id, "Pending entry updated by resubmission");
            return Ok(Committed {
                outcome: IngestOutcome {
                    status: IngestStatus::Queued,
                    entity_id: entity.id,
                    review_id: Some(pending.id),
                    warnings: prepared.warnings.clone(),
                    disposition: Disposition::Resubmitted,
                },
                new_places,
            });
        }

        let next = pending.status.apply(ReviewAction::Supersede)?;
        review::close_entry(
            conn,
            pending.id,
            next,
            &Decision {
                notes: Some("superseded by a resubmission without review warnings"),
                ..Default::default()
            },
            now,
        )
        .await?;

        entity.lifecycle_state = LifecycleState::Published;
        entities::update_entity(conn, &entity).await?;
        let mut changed = changed;
        changed.push("lifecycleState".to_string());
        changes::append_change(conn, &entity, ChangeAction::Update, &changed, None, &self.base_url, now).await?;

        info!(review_id = pending.id, entity_id = %entity.id, "Pending entry superseded and published");
        Ok(Committed {
            outcome: IngestOutcome {
                status: IngestStatus::Published,
                entity_id: entity.id,
                review_id: None,
                warnings: prepared.warnings.clone(),
                disposition: Disposition::Resubmitted,
            },
            new_places,
        })
    }

    /// Fold a submission into a near-identical published event
    #[allow(clippy::too_many_arguments)]
    async fn merge_into(
        &self,
        conn: &mut SqliteConnection,
        best: &EventMatch,
        payload: &Value,
        prepared: &PreparedEvent,
        source: &SourceMeta,
        replayed: Option<&SourceRecord>,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let mut entity = best.entity.clone();
        let record_id = self
            .attach_source(conn, entity.id, payload, prepared, source, replayed, now)
            .await?;

        let applied = self
            .dedup
            .merge_fields(conn, &mut entity, &prepared.fields, record_id, source.trust_level, now)
            .await?;

        if !applied.is_empty() {
            entities::update_entity(conn, &entity).await?;
            changes::append_change(conn, &entity, ChangeAction::Update, &applied, None, &self.base_url, now)
                .await?;
        }

        info!(
            entity_id = %entity.id,
            score = best.score,
            applied = applied.len(),
            "Submission merged into existing event"
        );
        Ok(Committed {
            outcome: IngestOutcome {
                status: IngestStatus::Published,
                entity_id: entity.id,
                review_id: None,
                warnings: prepared.warnings.clone(),
                disposition: Disposition::Merged,
            },
            new_places: Vec::new(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        conn: &mut SqliteConnection,
        payload: &Value,
        prepared: &PreparedEvent,
        warnings: Vec<Warning>,
        matches: &[EventMatch],
        source: &SourceMeta,
        replayed: Option<&SourceRecord>,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let mut entity = CanonicalEntity::new(EntityKind::Event, prepared.normalized.name.clone(), Map::new(), now);
        entity.set_event(&prepared.normalized)?;
        let new_places = self.link_references(conn, &prepared.normalized, &mut entity, source, now).await?;

        let needs_review = requires_review(&warnings);
        let auto_approved = needs_review && self.review.initial_action(source, &warnings).is_some();
        entity.lifecycle_state = if needs_review && !auto_approved {
            LifecycleState::PendingReview
        } else {
            LifecycleState::Published
        };
        entities::insert_entity(conn, &entity).await?;

        let record_id = self
            .attach_source(conn, entity.id, payload, prepared, source, replayed, now)
            .await?;
        self.record_all_fields(conn, entity.id, record_id, prepared, source, now).await?;

        let review_id = if needs_review {
            let id = review::insert_pending(
                conn,
                &NewReviewEntry {
                    entity_id: entity.id,
                    original_payload: payload.clone(),
                    normalized_payload: Value::Object(prepared.fields.clone()),
                    warnings: warnings.clone(),
                    dedup_key: Some(prepared.dedup_key.clone()),
                    source_key: source.source_key(),
                    payload_hash: prepared.payload_hash.clone(),
                    effective_start: entity.start_time,
                    effective_end: entity.end_time,
                },
                now,
            )
            .await?;

            if auto_approved {
                let next = ReviewStatus::Pending.apply(ReviewAction::Approve)?;
                review::close_entry(
                    conn,
                    id,
                    next,
                    &Decision {
                        reviewed_by: Some("policy"),
                        notes: Some("approved by trust policy"),
                        rejection_reason: None,
                    },
                    now,
                )
                .await?;
                info!(review_id = id, source_id = %source.source_id, "Review skipped by approval policy");
                None
            } else {
                Some(id)
            }
        } else {
            None
        };

        for m in matches {
            duplicates::record_candidate(
                conn,
                entity.id,
                m.entity.id,
                EntityKind::Event,
                m.score,
                CandidateLayer::NearDuplicate,
                now,
            )
            .await?;
        }

        let changed: Vec<String> = prepared.fields.keys().cloned().collect();
        changes::append_change(conn, &entity, ChangeAction::Create, &changed, None, &self.base_url, now).await?;

        let status = if review_id.is_some() {
            IngestStatus::Queued
        } else {
            IngestStatus::Published
        };
        Ok(Committed {
            outcome: IngestOutcome {
                status,
                entity_id: entity.id,
                review_id,
                warnings,
                disposition: Disposition::Created,
            },
            new_places,
        })
    }

    /// Layer 3: point the event at canonical venue and organizer records,
    /// creating them when nothing matches. Returns new places that still
    /// need coordinates.
    async fn link_references(
        &self,
        conn: &mut SqliteConnection,
        draft: &EventDraft,
        event: &mut CanonicalEntity,
        source: &SourceMeta,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let mut new_places = Vec::new();

        if let Some(place) = &draft.location {
            let locality = place.address_locality.as_deref();
            let (id, created) = match self
                .dedup
                .resolve_entity(conn, EntityKind::Place, &place.name, locality)
                .await?
            {
                EntityResolution::Matched { entity, .. } => (entity.id, false),
                EntityResolution::New { similar } => {
                    let mut created = CanonicalEntity::new(EntityKind::Place, place.name.clone(), Map::new(), now);
                    created.set_place(place)?;
                    let id = self.insert_referenced(conn, created, similar, now).await?;
                    (id, true)
                }
            };
            event.venue_id = Some(id);
            if created && !(place.latitude.is_some() && place.longitude.is_some()) {
                new_places.push(id);
            }
        }

        if let Some(org) = &draft.organizer {
            let locality = draft.location.as_ref().and_then(|p| p.address_locality.as_deref());
            let id = match self
                .dedup
                .resolve_entity(conn, EntityKind::Organization, &org.name, locality)
                .await?
            {
                EntityResolution::Matched { entity, .. } => entity.id,
                EntityResolution::New { similar } => {
                    let mut created = CanonicalEntity::new(EntityKind::Organization, org.name.clone(), Map::new(), now);
                    created.set_organization(org)?;
                    created.locality = locality.map(str::to_string);
                    self.insert_referenced(conn, created, similar, now).await?
                }
            };
            event.organizer_id = Some(id);
        }

        if !new_places.is_empty() {
            debug!(source_id = %source.source_id, places = new_places.len(), "New places created");
        }
        Ok(new_places)
    }

    async fn insert_referenced(
        &self,
        conn: &mut SqliteConnection,
        mut entity: CanonicalEntity,
        similar: Option<(Uuid, f64)>,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        entity.lifecycle_state = LifecycleState::Published;
        entities::insert_entity(conn, &entity).await?;

        if let Some((candidate_id, score)) = similar {
            duplicates::record_candidate(
                conn,
                entity.id,
                candidate_id,
                entity.kind,
                score,
                CandidateLayer::SimilarEntity,
                now,
            )
            .await?;
        }

        let changed: Vec<String> = entity.fields.keys().cloned().collect();
        changes::append_change(conn, &entity, ChangeAction::Create, &changed, None, &self.base_url, now).await?;
        Ok(entity.id)
    }

    /// Soft-delete an entity on admin request
    pub async fn delete_entity(&self, id: Uuid, reason: Option<&str>) -> Result<i64> {
        retry_on_lock("admin_delete", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("admin_delete").await?;

            let mut entity = entities::require_entity(tx.conn(), id).await?;
            if entity.is_deleted() {
                return Err(Error::Conflict(format!("entity {} is already deleted", id)));
            }

            if let Some(pending) = review::pending_for_entity(tx.conn(), id).await? {
                let next = pending.status.apply(ReviewAction::Supersede)?;
                review::close_entry(
                    tx.conn(),
                    pending.id,
                    next,
                    &Decision {
                        notes: Some("entity deleted by admin"),
                        ..Default::default()
                    },
                    now,
                )
                .await?;
            }

            let sequence = tombstones::soft_delete(
                tx.conn(),
                &mut entity,
                reason.unwrap_or(reasons::ADMIN_DELETE),
                None,
                &self.base_url,
                now,
            )
            .await?;
            tx.commit().await?;

            info!(entity_id = %id, sequence, "Entity deleted by admin");
            Ok(sequence)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(end: &str) -> EventInput {
        serde_json::from_value(json!({
            "name": "  Late Show ",
            "description": "Two sets",
            "startDate": "2026-03-31T23:00:00Z",
            "endDate": end,
            "location": {"name": "The Rex", "addressLocality": "Toronto"},
            "url": "HTTPS://Example.com/show#tickets"
        }))
        .unwrap()
    }

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn prepared_hash_survives_round_trip() {
        let validator = Validator::new(730);
        let first = prepare_event(&input("2026-03-31T02:00:00Z"), &validator, now()).unwrap();

        let replay: EventInput = serde_json::from_value(Value::Object(first.fields.clone())).unwrap();
        let second = prepare_event(&replay, &validator, now()).unwrap();

        assert_eq!(first.payload_hash, second.payload_hash);
        assert_eq!(first.dedup_key, second.dedup_key);
        assert!(second.warnings.is_empty());
    }

    #[test]
    fn cosmetic_differences_hash_identically() {
        let validator = Validator::new(730);
        let a = prepare_event(&input("2026-04-01T02:00:00Z"), &validator, now()).unwrap();
        let mut other = input("2026-04-01T02:00:00Z");
        other.name = "Late Show".into();
        other.url = Some("https://example.com/show".into());
        let b = prepare_event(&other, &validator, now()).unwrap();
        assert_eq!(a.payload_hash, b.payload_hash);
    }

    #[test]
    fn non_object_payload_is_a_validation_error() {
        assert!(matches!(parse_payload(&json!([1, 2])), Err(Error::Validation(_))));
        assert!(matches!(
            parse_payload(&json!({"name": 5})),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn duplicate_surfacing_ignored_when_comparing_rejections() {
        let a = vec![Warning::low("description", codes::MISSING_DESCRIPTION, "x")];
        let mut b = a.clone();
        b.push(Warning::low("name", codes::POTENTIAL_DUPLICATE, "y"));
        assert_eq!(rejection_codes(&a), rejection_codes(&b));
    }
}
