//! Review workflow tests
//!
//! Approve, reject, fix and expiry, plus how past rejections gate
//! resubmissions.

mod helpers;

use helpers::*;
use sel_common::Error;
use sel_ingest::db::{changes, entities, review, tombstones};
use sel_ingest::models::{
    codes, ChangeAction, IngestStatus, LifecycleState, ReviewStatus, SourceMeta,
};
use sel_ingest::services::FixOutcome;
use sel_ingest::AppState;
use serde_json::{json, Map, Value};

/// A future event without a description, which always needs review
fn undescribed(name: &str, day: &str, venue: &str) -> Value {
    let mut payload = event_payload(name, &at(day, "20:00"), None, venue);
    payload.as_object_mut().unwrap().remove("description");
    payload
}

/// A past event whose reversed end needs review
fn past_reversed(name: &str) -> Value {
    let day = (chrono::Utc::now() - chrono::Duration::days(3))
        .format("%Y-%m-%d")
        .to_string();
    event_payload(name, &at(&day, "23:00"), Some(&at(&day, "10:00")), "Old Hall")
}

async fn queue(state: &AppState, payload: &Value, source_id: &str) -> (uuid::Uuid, i64) {
    let outcome = state.coordinator.ingest(payload, &source(source_id)).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Queued);
    (outcome.entity_id, outcome.review_id.unwrap())
}

fn corrections(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn rejected_submission_stays_rejected_until_its_issues_change() {
    let state = create_test_state().await;
    let day = future_day(30);
    let payload = undescribed("Harbour Fireworks", &day, "Wrong Pier");

    let (entity_id, review_id) = queue(&state, &payload, "city").await;
    state.review.reject(review_id, "alice", "bad location").await.unwrap();

    // Identical resubmission from the same source
    let err = state.coordinator.ingest(&payload, &source("city")).await.unwrap_err();
    match err {
        Error::PreviouslyRejected {
            review_id: prior,
            reason,
            reviewed_by,
            ..
        } => {
            assert_eq!(prior, review_id);
            assert_eq!(reason, "bad location");
            assert_eq!(reviewed_by, "alice");
        }
        other => panic!("expected PreviouslyRejected, got {:?}", other),
    }

    // Same content relayed by another producer
    let err = state.coordinator.ingest(&payload, &source("relay")).await.unwrap_err();
    assert!(matches!(err, Error::PreviouslyRejected { .. }));

    // Corrected venue: a different event as far as dedup is concerned
    let corrected = undescribed("Harbour Fireworks", &day, "Sugar Beach");
    let outcome = state.coordinator.ingest(&corrected, &source("city")).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Queued);
    assert_ne!(outcome.entity_id, entity_id);

    let mut conn = state.store.read().await.unwrap();
    let rejected = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(rejected.lifecycle_state, LifecycleState::Deleted);
    let tombstone = tombstones::find_for_entity(&mut conn, entity_id).await.unwrap().unwrap();
    assert_eq!(tombstone.reason, "rejected");
}

#[tokio::test]
async fn resubmission_with_different_issues_goes_through() {
    let state = create_test_state().await;
    let day = future_day(25);
    let payload = undescribed("Drum Circle", &day, "Trinity Bellwoods");

    let (_, review_id) = queue(&state, &payload, "park").await;
    state.review.reject(review_id, "bob", "needs a description").await.unwrap();

    // Same event, now described: no warnings left, so it publishes
    let described = event_payload("Drum Circle", &at(&day, "20:00"), None, "Trinity Bellwoods");
    let outcome = state.coordinator.ingest(&described, &source("park")).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Published);
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn rejection_lapses_once_the_event_is_over() {
    let state = create_test_state().await;
    let payload = past_reversed("Bygone Gala");

    let (entity_id, review_id) = queue(&state, &payload, "gala").await;
    state.review.reject(review_id, "carol", "wrong times").await.unwrap();

    let outcome = state.coordinator.ingest(&payload, &source("gala")).await.unwrap();
    assert_eq!(outcome.status, IngestStatus::Queued);
    assert_ne!(outcome.entity_id, entity_id);
}

#[tokio::test]
async fn approve_publishes_and_records_lifecycle_change() {
    let state = create_test_state().await;
    let payload = undescribed("Zine Fair", &future_day(14), "Centre for Social Innovation");

    let (entity_id, review_id) = queue(&state, &payload, "zines").await;
    let entry = state.review.approve(review_id, "dana", Some("looks fine")).await.unwrap();

    assert_eq!(entry.status, ReviewStatus::Approved);
    assert_eq!(entry.reviewed_by.as_deref(), Some("dana"));
    assert_eq!(entry.review_notes.as_deref(), Some("looks fine"));
    assert!(entry.reviewed_at.is_some());

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);

    let feed = changes::list_for_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0].action, ChangeAction::Create);
    assert_eq!(feed[1].action, ChangeAction::Update);
    assert_eq!(feed[1].changed_fields, vec!["lifecycleState".to_string()]);
    assert_eq!(feed[1].snapshot["lifecycleState"], "published");
}

#[tokio::test]
async fn terminal_entries_refuse_further_actions() {
    let state = create_test_state().await;
    let payload = undescribed("Choir Practice", &future_day(7), "St. James");

    let (_, review_id) = queue(&state, &payload, "choir").await;
    state.review.reject(review_id, "erin", "duplicate listing").await.unwrap();

    let err = state.review.approve(review_id, "erin", None).await.unwrap_err();
    match err {
        Error::InvalidTransition { from, action } => {
            assert_eq!(from, "rejected");
            assert_eq!(action, "approve");
        }
        other => panic!("expected InvalidTransition, got {:?}", other),
    }

    let err = state.review.reject(review_id, "erin", "again").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let err = state
        .review
        .fix(review_id, "erin", &corrections(json!({"description": "x"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn reject_requires_a_reason() {
    let state = create_test_state().await;
    let payload = undescribed("Book Swap", &future_day(4), "Library");
    let (_, review_id) = queue(&state, &payload, "lib").await;

    let err = state.review.reject(review_id, "finn", "   ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(state.review.get(review_id).await.unwrap().status, ReviewStatus::Pending);
}

#[tokio::test]
async fn fix_that_clears_warnings_publishes() {
    let state = create_test_state().await;
    let payload = undescribed("Tango Lesson", &future_day(11), "Dance Hall");
    let (entity_id, review_id) = queue(&state, &payload, "tango").await;

    let outcome = state
        .review
        .fix(
            review_id,
            "gwen",
            &corrections(json!({"description": "Beginner-friendly tango"})),
            Some("added description"),
        )
        .await
        .unwrap();

    let FixOutcome::Approved { entry } = outcome else {
        panic!("expected the fix to approve the entry");
    };
    assert_eq!(entry.status, ReviewStatus::Approved);
    assert_eq!(entry.reviewed_by.as_deref(), Some("gwen"));

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
    assert_eq!(entity.fields["description"], "Beginner-friendly tango");

    let feed = changes::list_for_entity(&mut conn, entity_id).await.unwrap();
    let last = feed.last().unwrap();
    assert!(last.changed_fields.contains(&"description".to_string()));
    assert!(last.changed_fields.contains(&"lifecycleState".to_string()));
}

#[tokio::test]
async fn fix_that_leaves_warnings_keeps_entry_pending() {
    let state = create_test_state().await;
    let payload = undescribed("Film Night", &future_day(9), "Revue Cinema");
    let (entity_id, review_id) = queue(&state, &payload, "revue").await;

    let outcome = state
        .review
        .fix(review_id, "hana", &corrections(json!({"name": "Film Night: Classics"})), None)
        .await
        .unwrap();

    let FixOutcome::StillNeedsReview { entry } = outcome else {
        panic!("expected the entry to stay pending");
    };
    assert_eq!(entry.status, ReviewStatus::Pending);
    assert_eq!(entry.normalized_payload["name"], "Film Night: Classics");
    assert!(entry.warnings.iter().any(|w| w.code == codes::MISSING_DESCRIPTION));

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::PendingReview);
    assert_eq!(entity.name, "Film Night: Classics");

    // Peers see the corrected payload even though it is still held
    let feed = changes::list_for_entity(&mut conn, entity_id).await.unwrap();
    let last = feed.last().unwrap();
    assert_eq!(last.action, ChangeAction::Update);
    assert_eq!(last.changed_fields, vec!["name".to_string()]);
    assert_eq!(last.snapshot["name"], "Film Night: Classics");
    assert_eq!(last.snapshot["lifecycleState"], "pending_review");
}

#[tokio::test]
async fn invalid_fix_changes_nothing() {
    let state = create_test_state().await;
    let payload = undescribed("Pottery Class", &future_day(6), "Clay Studio");
    let (entity_id, review_id) = queue(&state, &payload, "clay").await;

    let before = {
        let mut conn = state.store.read().await.unwrap();
        entities::require_entity(&mut conn, entity_id).await.unwrap()
    };

    let err = state
        .review
        .fix(review_id, "ivan", &corrections(json!({"startDate": "someday"})), None)
        .await
        .unwrap_err();
    let Error::Validation(fields) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(fields[0].field, "startDate");

    let entry = state.review.get(review_id).await.unwrap();
    assert_eq!(entry.status, ReviewStatus::Pending);
    let mut conn = state.store.read().await.unwrap();
    let after = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(after.payload_hash, before.payload_hash);
    assert_eq!(after.lifecycle_state, LifecycleState::PendingReview);
}

#[tokio::test]
async fn expiry_purges_only_finished_events() {
    let state = create_test_state().await;
    let (old_entity, old_review) = queue(&state, &past_reversed("Last Week Show"), "hall").await;
    let (_, upcoming_review) =
        queue(&state, &undescribed("Next Month Show", &future_day(30), "Hall"), "hall").await;

    let purged = state.review.expire(chrono::Utc::now()).await.unwrap();
    assert_eq!(purged, 1);

    assert!(matches!(state.review.get(old_review).await, Err(Error::NotFound(_))));
    assert_eq!(
        state.review.get(upcoming_review).await.unwrap().status,
        ReviewStatus::Pending
    );

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, old_entity).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Deleted);
    let tombstone = tombstones::find_for_entity(&mut conn, old_entity).await.unwrap().unwrap();
    assert_eq!(tombstone.reason, "review_expired");
    drop(conn);

    // Nothing left to expire
    assert_eq!(state.review.expire(chrono::Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn trusted_sources_skip_review() {
    let mut config = test_config();
    config.review.auto_approve_min_trust = Some(8);
    let state = create_test_state_with(config).await;

    let payload = undescribed("Symphony Matinee", &future_day(21), "Roy Thomson Hall");
    let outcome = state
        .coordinator
        .ingest(&payload, &SourceMeta::new("symphony", 9))
        .await
        .unwrap();

    assert_eq!(outcome.status, IngestStatus::Published);
    assert_eq!(outcome.review_id, None);
    assert!(outcome.warnings.iter().any(|w| w.code == codes::MISSING_DESCRIPTION));

    let mut conn = state.store.read().await.unwrap();
    let entry = review::latest_for_entity(&mut conn, outcome.entity_id, ReviewStatus::Approved)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.reviewed_by.as_deref(), Some("policy"));
    drop(conn);

    // Below the threshold the same kind of submission still waits
    let low = undescribed("Open Rehearsal", &future_day(22), "Roy Thomson Hall");
    let outcome = state
        .coordinator
        .ingest(&low, &SourceMeta::new("fan-site", 3))
        .await
        .unwrap();
    assert_eq!(outcome.status, IngestStatus::Queued);
}

#[tokio::test]
async fn pending_entries_page_by_cursor() {
    let state = create_test_state().await;
    for (i, name) in ["Alpha Talk", "Bravo Talk", "Charlie Talk"].iter().enumerate() {
        let venue = format!("Room {}", i + 1);
        queue(&state, &undescribed(name, &future_day(10 + i as i64), &venue), "talks").await;
    }

    let first = state.review.list(Some(ReviewStatus::Pending), None, Some(2)).await.unwrap();
    assert_eq!(first.entries.len(), 2);
    let cursor = first.next_cursor.expect("more entries remain");

    let second = state
        .review
        .list(Some(ReviewStatus::Pending), Some(cursor), Some(2))
        .await
        .unwrap();
    assert_eq!(second.entries.len(), 1);
    assert_eq!(second.next_cursor, None);
    assert!(second.entries[0].id > first.entries[1].id);
}
