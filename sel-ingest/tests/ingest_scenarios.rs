//! Ingestion pipeline scenarios
//!
//! Date correction, idempotent resubmission, round-trip hashing and the
//! dedup layers, driven through `IngestCoordinator`.

mod helpers;

use chrono::{DateTime, Utc};
use helpers::*;
use sel_common::Error;
use sel_ingest::db::{entities, provenance, review};
use sel_ingest::models::{
    codes, requires_review, ChangeAction, Confidence, Disposition, EntityKind, IngestStatus,
    LifecycleState, ReviewStatus,
};
use sel_ingest::models::payload::input_from_fields;
use sel_ingest::services::coordinator::prepare_event;
use sel_ingest::services::Validator;
use serde_json::{json, Value};

fn utc(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[tokio::test]
async fn overnight_end_is_corrected_and_published() {
    let state = create_test_state().await;
    let payload = event_payload(
        "Late Show",
        "2026-03-31T23:00:00Z",
        Some("2026-03-31T02:00:00Z"),
        "The Rex",
    );

    let outcome = state.coordinator.ingest(&payload, &source("venue-feed")).await.unwrap();

    assert_eq!(outcome.status, IngestStatus::Published);
    assert_eq!(outcome.review_id, None);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].code, codes::REVERSED_DATES_TIMEZONE_LIKELY);
    assert_eq!(outcome.warnings[0].confidence, Confidence::High);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, outcome.entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
    assert_eq!(entity.end_time, Some(utc("2026-04-01T02:00:00Z")));
    assert_eq!(entity.start_time, Some(utc("2026-03-31T23:00:00Z")));
}

#[tokio::test]
async fn implausible_reversed_end_is_queued_for_review() {
    let state = create_test_state().await;
    let payload = event_payload(
        "Late Show",
        "2026-03-31T23:00:00Z",
        Some("2026-03-31T10:00:00Z"),
        "The Rex",
    );

    let outcome = state.coordinator.ingest(&payload, &source("venue-feed")).await.unwrap();

    assert_eq!(outcome.status, IngestStatus::Queued);
    assert!(outcome.review_id.is_some());
    assert_eq!(outcome.warnings[0].code, codes::REVERSED_DATES_NEEDS_REVIEW);
    assert!(requires_review(&outcome.warnings));

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, outcome.entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::PendingReview);
    assert_eq!(entity.end_time, Some(utc("2026-04-01T10:00:00Z")));

    let entry = review::require_entry(&mut conn, outcome.review_id.unwrap()).await.unwrap();
    assert_eq!(entry.status, ReviewStatus::Pending);
    assert_eq!(entry.entity_id, entity.id);
    assert_eq!(entry.original_payload["endDate"], "2026-03-31T10:00:00Z");
}

#[tokio::test]
async fn identical_hash_from_same_source_returns_first_result() {
    let state = create_test_state().await;
    let start = at(&future_day(20), "19:00");
    let first_payload = virtual_event_payload("Poetry Hour", &start);
    // Cosmetically different, same normalized payload
    let mut second_payload = first_payload.clone();
    second_payload["name"] = json!("  Poetry Hour  ");

    let first = state.coordinator.ingest(&first_payload, &source("library")).await.unwrap();
    let second = state.coordinator.ingest(&second_payload, &source("library")).await.unwrap();

    assert_eq!(first.disposition, Disposition::Created);
    assert_eq!(second.disposition, Disposition::Unchanged);
    assert_eq!(second.entity_id, first.entity_id);
    assert_eq!(second.status, first.status);

    let page = state.changes.list(None, None, None).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].entity_id, first.entity_id);
    assert_eq!(page.changes[0].action, ChangeAction::Create);
}

#[tokio::test]
async fn byte_identical_resubmission_refreshes_one_source_record() {
    let state = create_test_state().await;
    let payload = event_payload("Jazz Brunch", &at(&future_day(10), "11:00"), None, "Cafe Oro");

    let first = state.coordinator.ingest(&payload, &source("cafe")).await.unwrap();
    let first_record = {
        let mut conn = state.store.read().await.unwrap();
        provenance::list_source_records(&mut conn, first.entity_id).await.unwrap()
    };
    let second = state.coordinator.ingest(&payload, &source("cafe")).await.unwrap();

    assert_eq!(first.entity_id, second.entity_id);
    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 1);

    let mut conn = state.store.read().await.unwrap();
    let records = provenance::list_source_records(&mut conn, first.entity_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, first_record[0].id);
    assert_eq!(records[0].payload, payload);
    assert!(records[0].retrieved_at >= first_record[0].retrieved_at);
}

#[tokio::test]
async fn stored_entity_reingests_to_the_same_hash() {
    let state = create_test_state().await;
    let payload = json!({
        "name": "  Open   Studio ",
        "description": "Printmaking",
        "startDate": at(&future_day(15), "18:00"),
        "location": {"name": "Artscape", "addressLocality": "Toronto"},
        "url": "HTTP://Artscape.example.org:80/open-studio#top",
        "keywords": ["Art", "print", "art"]
    });

    let outcome = state.coordinator.ingest(&payload, &source("studio")).await.unwrap();
    let entity = {
        let mut conn = state.store.read().await.unwrap();
        entities::require_entity(&mut conn, outcome.entity_id).await.unwrap()
    };

    let replay = input_from_fields(&entity.fields).unwrap();
    let prepared = prepare_event(&replay, &Validator::new(730), Utc::now()).unwrap();
    assert_eq!(prepared.payload_hash, entity.payload_hash);
    assert!(prepared.warnings.is_empty());

    // And through the pipeline: the same source sees it as unchanged
    let again = state
        .coordinator
        .ingest(&Value::Object(entity.fields.clone()), &source("studio"))
        .await
        .unwrap();
    assert_eq!(again.disposition, Disposition::Unchanged);
    assert_eq!(again.entity_id, entity.id);
}

#[tokio::test]
async fn unparsable_payload_is_a_validation_error() {
    let state = create_test_state().await;
    let payload = json!({
        "name": "",
        "startDate": "next tuesday",
        "url": "ftp://example.org"
    });

    let err = state.coordinator.ingest(&payload, &source("x")).await.unwrap_err();
    let Error::Validation(fields) = err else {
        panic!("expected validation error, got {:?}", err);
    };
    let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
    assert!(names.contains(&"name"));
    assert!(names.contains(&"startDate"));
    assert!(names.contains(&"location"));
    assert!(names.contains(&"url"));

    assert_eq!(count_rows(&state, "entities", "").await, 0);
    assert_eq!(count_rows(&state, "change_feed", "").await, 0);
}

#[tokio::test]
async fn same_event_from_second_source_merges() {
    let state = create_test_state().await;
    let start = at(&future_day(12), "20:00");
    let payload = event_payload("Blues Jam", &start, None, "Horseshoe Tavern");

    let first = state.coordinator.ingest(&payload, &source("tavern")).await.unwrap();
    let mut richer = payload.clone();
    richer["image"] = json!("https://img.example.org/blues.jpg");
    let second = state.coordinator.ingest(&richer, &source("aggregator")).await.unwrap();

    assert_eq!(second.disposition, Disposition::Merged);
    assert_eq!(second.entity_id, first.entity_id);
    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 1);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, first.entity_id).await.unwrap();
    assert_eq!(entity.fields["image"], "https://img.example.org/blues.jpg");
    let records = provenance::list_source_records(&mut conn, first.entity_id).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn venue_is_reused_across_events() {
    let state = create_test_state().await;
    let a = state
        .coordinator
        .ingest(
            &event_payload("Quiz Night", &at(&future_day(5), "19:00"), None, "The Ossington"),
            &source("pub"),
        )
        .await
        .unwrap();
    let b = state
        .coordinator
        .ingest(
            &event_payload("Karaoke", &at(&future_day(6), "21:00"), None, "The Ossington"),
            &source("pub"),
        )
        .await
        .unwrap();

    assert_eq!(count_rows(&state, "entities", "kind = 'place'").await, 1);
    let mut conn = state.store.read().await.unwrap();
    let first = entities::require_entity(&mut conn, a.entity_id).await.unwrap();
    let second = entities::require_entity(&mut conn, b.entity_id).await.unwrap();
    assert!(first.venue_id.is_some());
    assert_eq!(first.venue_id, second.venue_id);

    let place = entities::require_entity(&mut conn, first.venue_id.unwrap()).await.unwrap();
    assert_eq!(place.kind, EntityKind::Place);
    assert_eq!(place.lifecycle_state, LifecycleState::Published);
}

#[tokio::test]
async fn similar_event_from_other_source_flags_potential_duplicate() {
    let state = create_test_state().await;
    let start = at(&future_day(9), "20:00");

    state
        .coordinator
        .ingest(&event_payload("Salsa Social Night", &start, None, "Lula Lounge"), &source("lula"))
        .await
        .unwrap();
    let outcome = state
        .coordinator
        .ingest(&event_payload("Salsa Social", &start, None, "Lula Lounge"), &source("listings"))
        .await
        .unwrap();

    assert_eq!(outcome.disposition, Disposition::Created);
    assert_eq!(outcome.status, IngestStatus::Queued);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.code == codes::POTENTIAL_DUPLICATE));
    assert_eq!(
        count_rows(&state, "duplicate_candidates", "layer = 'near_duplicate'").await,
        1
    );
}

#[tokio::test]
async fn pending_resubmission_updates_the_queued_entry() {
    let state = create_test_state().await;
    let start = at(&future_day(8), "23:00");
    let end = at(&future_day(8), "10:00");
    let payload = event_payload("Night Market", &start, Some(&end), "Chinatown Centre");

    let first = state.coordinator.ingest(&payload, &source("market")).await.unwrap();
    assert_eq!(first.status, IngestStatus::Queued);

    // Fixed dates, so nothing needs review any more
    let mut fixed = payload.clone();
    fixed["endDate"] = json!(at(&future_day(9), "02:00"));
    let second = state.coordinator.ingest(&fixed, &source("market")).await.unwrap();

    assert_eq!(second.disposition, Disposition::Resubmitted);
    assert_eq!(second.status, IngestStatus::Published);
    assert_eq!(second.entity_id, first.entity_id);

    let mut conn = state.store.read().await.unwrap();
    let entry = review::require_entry(&mut conn, first.review_id.unwrap()).await.unwrap();
    assert_eq!(entry.status, ReviewStatus::Superseded);
    let entity = entities::require_entity(&mut conn, first.entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
}
