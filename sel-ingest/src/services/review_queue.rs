//! Review queue service
//!
//! Owns every reviewer-driven transition. Each operation runs in one write
//! transaction: the entry status, the entity lifecycle and the change feed
//! entry commit together.

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::coordinator::prepare_event;
use super::validator::Validator;
use crate::db::provenance::{self, FieldObservation};
use crate::db::review::{self, Decision, NewReviewEntry};
use crate::db::{changes, entities, tombstones, Store};
use crate::models::feed::reasons;
use crate::models::payload::input_from_fields;
use crate::models::{
    requires_review, ChangeAction, LifecycleState, ProducerKind, ReviewAction, ReviewEntry,
    ReviewStatus, SourceMeta, Warning,
};
use crate::utils::retry_on_lock;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;
/// Trust given to reviewer corrections
const REVIEWER_TRUST: u8 = 10;

/// Decides whether a submission that would need review is approved without a human
pub trait ApprovalPolicy: Send + Sync {
    fn auto_approve(&self, source: &SourceMeta, warnings: &[Warning]) -> bool;
}

/// Approves submissions from sources at or above a trust level
#[derive(Debug, Clone, Default)]
pub struct TrustThresholdPolicy {
    min_trust: Option<u8>,
}

impl TrustThresholdPolicy {
    /// `None` never auto-approves
    pub fn new(min_trust: Option<u8>) -> Self {
        Self { min_trust }
    }
}

impl ApprovalPolicy for TrustThresholdPolicy {
    fn auto_approve(&self, source: &SourceMeta, _warnings: &[Warning]) -> bool {
        self.min_trust
            .is_some_and(|min| source.trust_level >= min)
    }
}

/// One page of entries
#[derive(Debug, Clone, Serialize)]
pub struct ReviewPage {
    pub entries: Vec<ReviewEntry>,
    /// Pass back as `cursor` to continue; `None` on the last page
    pub next_cursor: Option<i64>,
}

/// Result of a reviewer fix
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FixOutcome {
    Approved { entry: ReviewEntry },
    /// Corrections applied, but low-confidence warnings remain
    StillNeedsReview { entry: ReviewEntry },
}

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`
pub fn page_limit(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Top-level merge of reviewer corrections; `null` removes a field
pub fn apply_corrections(base: &Value, corrections: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    for (key, value) in corrections {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub struct ReviewQueue {
    store: Store,
    validator: Validator,
    base_url: String,
    policy: Arc<dyn ApprovalPolicy>,
}

impl ReviewQueue {
    pub fn new(
        store: Store,
        validator: Validator,
        base_url: impl Into<String>,
        policy: Arc<dyn ApprovalPolicy>,
    ) -> Self {
        Self {
            store,
            validator,
            base_url: base_url.into(),
            policy,
        }
    }

    /// Transition a new entry takes on creation, if the policy short-circuits review
    pub fn initial_action(&self, source: &SourceMeta, warnings: &[Warning]) -> Option<ReviewAction> {
        self.policy
            .auto_approve(source, warnings)
            .then_some(ReviewAction::Approve)
    }

    pub async fn list(
        &self,
        status: Option<ReviewStatus>,
        cursor: Option<i64>,
        limit: Option<u32>,
    ) -> Result<ReviewPage> {
        let limit = page_limit(limit);
        let mut conn = self.store.read().await?;
        let mut entries =
            review::list_entries(&mut conn, status, cursor.unwrap_or(0), i64::from(limit) + 1).await?;

        let next_cursor = if entries.len() > limit as usize {
            entries.truncate(limit as usize);
            entries.last().map(|e| e.id)
        } else {
            None
        };
        Ok(ReviewPage { entries, next_cursor })
    }

    pub async fn get(&self, id: i64) -> Result<ReviewEntry> {
        let mut conn = self.store.read().await?;
        review::require_entry(&mut conn, id).await
    }

    /// Publish the entity held by a pending entry
    pub async fn approve(&self, id: i64, reviewer: &str, notes: Option<&str>) -> Result<ReviewEntry> {
        retry_on_lock("review_approve", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("review_approve").await?;

            let entry = review::require_entry(tx.conn(), id).await?;
            let next = entry.status.apply(ReviewAction::Approve)?;

            let mut entity = entities::require_entity(tx.conn(), entry.entity_id).await?;
            entity.lifecycle_state = LifecycleState::Published;
            entity.updated_at = now;
            entities::update_entity(tx.conn(), &entity).await?;

            review::close_entry(
                tx.conn(),
                id,
                next,
                &Decision {
                    reviewed_by: Some(reviewer),
                    notes,
                    rejection_reason: None,
                },
                now,
            )
            .await?;

            changes::append_change(
                tx.conn(),
                &entity,
                ChangeAction::Update,
                &["lifecycleState".to_string()],
                None,
                &self.base_url,
                now,
            )
            .await?;

            let updated = review::require_entry(tx.conn(), id).await?;
            tx.commit().await?;

            info!(review_id = id, entity_id = %entity.id, reviewer, "Review entry approved");
            Ok(updated)
        })
        .await
    }

    /// Reject with a mandatory reason; the entity is deleted and tombstoned
    pub async fn reject(&self, id: i64, reviewer: &str, reason: &str) -> Result<ReviewEntry> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("reason", "is required when rejecting"));
        }

        retry_on_lock("review_reject", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("review_reject").await?;

            let entry = review::require_entry(tx.conn(), id).await?;
            let next = entry.status.apply(ReviewAction::Reject)?;

            review::close_entry(
                tx.conn(),
                id,
                next,
                &Decision {
                    reviewed_by: Some(reviewer),
                    notes: None,
                    rejection_reason: Some(reason),
                },
                now,
            )
            .await?;

            let mut entity = entities::require_entity(tx.conn(), entry.entity_id).await?;
            tombstones::soft_delete(tx.conn(), &mut entity, reasons::REJECTED, None, &self.base_url, now)
                .await?;

            let updated = review::require_entry(tx.conn(), id).await?;
            tx.commit().await?;

            info!(review_id = id, entity_id = %entity.id, reviewer, reason, "Review entry rejected");
            Ok(updated)
        })
        .await
    }

    /// Apply reviewer corrections and re-run normalization and validation.
    ///
    /// An invalid correction fails with a validation error and changes nothing.
    /// Corrections that still leave low-confidence warnings keep the entry
    /// pending with the new payload.
    pub async fn fix(
        &self,
        id: i64,
        reviewer: &str,
        corrections: &Map<String, Value>,
        notes: Option<&str>,
    ) -> Result<FixOutcome> {
        retry_on_lock("review_fix", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("review_fix").await?;

            let entry = review::require_entry(tx.conn(), id).await?;
            if entry.status != ReviewStatus::Pending {
                // Surface the state machine's verdict for a non-pending entry
                entry.status.apply(ReviewAction::Fix)?;
            }

            let corrected = apply_corrections(&entry.normalized_payload, corrections);
            let input = input_from_fields(&corrected)
                .map_err(|e| Error::validation("corrections", e.to_string()))?;
            let prepared = prepare_event(&input, &self.validator, now)?;

            let mut entity = entities::require_entity(tx.conn(), entry.entity_id).await?;
            entity.set_event(&prepared.normalized)?;
            entity.updated_at = now;

            let reviewer_source = SourceMeta::new(format!("reviewer:{}", reviewer), REVIEWER_TRUST)
                .with_producer(ProducerKind::Admin);
            if provenance::find_by_hash(tx.conn(), &reviewer_source.source_id, &prepared.payload_hash)
                .await?
                .is_none()
            {
                let record_id = provenance::insert_source_record(
                    tx.conn(),
                    entity.id,
                    &reviewer_source,
                    &Value::Object(corrected.clone()),
                    &prepared.payload_hash,
                    now,
                )
                .await?;
                let observations: Vec<FieldObservation<'_>> = corrections
                    .iter()
                    .map(|(field, value)| FieldObservation {
                        field_path: field.as_str(),
                        value_hash: sel_common::linked_data::fingerprint(value),
                        confidence: 1.0,
                        applied: true,
                    })
                    .collect();
                provenance::record_fields(tx.conn(), entity.id, record_id, REVIEWER_TRUST, &observations, now)
                    .await?;
            }

            let outcome = if requires_review(&prepared.warnings) {
                review::update_pending(
                    tx.conn(),
                    id,
                    &NewReviewEntry {
                        entity_id: entity.id,
                        original_payload: entry.original_payload.clone(),
                        normalized_payload: Value::Object(prepared.fields.clone()),
                        warnings: prepared.warnings.clone(),
                        dedup_key: Some(prepared.dedup_key.clone()),
                        source_key: None,
                        payload_hash: prepared.payload_hash.clone(),
                        effective_start: Some(prepared.normalized.schedule.effective_start()),
                        effective_end: Some(prepared.normalized.schedule.effective_end()),
                    },
                    now,
                )
                .await?;
                entities::update_entity(tx.conn(), &entity).await?;
                let changed: Vec<String> = corrections.keys().cloned().collect();
                changes::append_change(
                    tx.conn(),
                    &entity,
                    ChangeAction::Update,
                    &changed,
                    None,
                    &self.base_url,
                    now,
                )
                .await?;
                debug!(review_id = id, warnings = prepared.warnings.len(), "Fix left entry pending");
                FixOutcome::StillNeedsReview {
                    entry: review::require_entry(tx.conn(), id).await?,
                }
            } else {
                let next = entry.status.apply(ReviewAction::Fix)?;
                entity.lifecycle_state = LifecycleState::Published;
                entities::update_entity(tx.conn(), &entity).await?;
                review::close_entry(
                    tx.conn(),
                    id,
                    next,
                    &Decision {
                        reviewed_by: Some(reviewer),
                        notes,
                        rejection_reason: None,
                    },
                    now,
                )
                .await?;

                let mut changed: Vec<String> = corrections.keys().cloned().collect();
                changed.push("lifecycleState".to_string());
                changes::append_change(
                    tx.conn(),
                    &entity,
                    ChangeAction::Update,
                    &changed,
                    None,
                    &self.base_url,
                    now,
                )
                .await?;
                info!(review_id = id, entity_id = %entity.id, reviewer, "Review entry fixed and approved");
                FixOutcome::Approved {
                    entry: review::require_entry(tx.conn(), id).await?,
                }
            };

            tx.commit().await?;
            Ok(outcome)
        })
        .await
    }

    /// Purge pending entries whose event is already over.
    ///
    /// Each expiry is its own transaction so one failure does not hold back
    /// the rest. Returns how many entries were purged.
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = {
            let mut conn = self.store.read().await?;
            review::expired_pending(&mut conn, now).await?
        };

        let mut purged = 0;
        for entry in expired {
            let result = retry_on_lock("review_expire", self.store.max_lock_wait_ms(), || async {
                let mut tx = self.store.begin_write("review_expire").await?;

                // Re-check inside the transaction; a reviewer may have acted meanwhile
                let Some(current) = review::get_entry(tx.conn(), entry.id).await? else {
                    return Ok(false);
                };
                if current.status != ReviewStatus::Pending {
                    return Ok(false);
                }

                review::delete_entry(tx.conn(), entry.id).await?;
                let mut entity = entities::require_entity(tx.conn(), entry.entity_id).await?;
                tombstones::soft_delete(
                    tx.conn(),
                    &mut entity,
                    reasons::REVIEW_EXPIRED,
                    None,
                    &self.base_url,
                    now,
                )
                .await?;

                tx.commit().await?;
                Ok(true)
            })
            .await;

            match result {
                Ok(true) => purged += 1,
                Ok(false) => {}
                Err(e) => warn!(review_id = entry.id, error = %e, "Failed to expire review entry"),
            }
        }

        if purged > 0 {
            info!(purged, "Expired pending review entries");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trust_threshold_policy() {
        let policy = TrustThresholdPolicy::new(Some(8));
        assert!(policy.auto_approve(&SourceMeta::new("museum", 9), &[]));
        assert!(!policy.auto_approve(&SourceMeta::new("scraper", 5), &[]));
        assert!(!TrustThresholdPolicy::new(None).auto_approve(&SourceMeta::new("museum", 10), &[]));
    }

    #[test]
    fn page_limit_clamped() {
        assert_eq!(page_limit(None), 50);
        assert_eq!(page_limit(Some(0)), 1);
        assert_eq!(page_limit(Some(1000)), 200);
    }

    #[test]
    fn corrections_overlay_and_remove() {
        let base = json!({"name": "Jazz", "url": "https://x.test/", "description": "old"});
        let corrections = json!({"description": "new", "url": null});
        let merged = apply_corrections(&base, corrections.as_object().unwrap());
        assert_eq!(Value::Object(merged), json!({"name": "Jazz", "description": "new"}));
    }
}
