//! Federation sync tests
//!
//! Peers push change feed entries; delivery is at-least-once, so replays,
//! stale updates and deletes must all be harmless.

mod helpers;

use helpers::*;
use sel_common::linked_data::frame;
use sel_common::Error;
use sel_ingest::db::{changes, entities, provenance, tombstones};
use sel_ingest::models::{ChangeAction, EntityKind, LifecycleState, PeerChange, SyncOutcome};
use sel_ingest::services::federation::peer_change;
use sel_ingest::AppState;
use serde_json::{json, Value};

const PEER: &str = "montreal";
const EVENT_URI: &str = "https://events.montreal.example/events/42";

async fn with_peer() -> AppState {
    let state = create_test_state().await;
    state
        .federation
        .register_peer(PEER, "events.montreal.example", "https://events.montreal.example", 6, true)
        .await
        .unwrap();
    state
}

/// A framed remote event snapshot
fn remote_event(uri: &str, name: &str, lifecycle: &str) -> Value {
    let fields = json!({
        "name": name,
        "description": "Shared by a peer",
        "startDate": at(&future_day(40), "19:30"),
        "location": {"name": "Place des Arts", "addressLocality": "Montreal"},
        "lifecycleState": lifecycle
    });
    frame("Event", uri, fields.as_object().unwrap())
}

fn create(seq: i64, name: &str) -> PeerChange {
    peer_change(seq, ChangeAction::Create, remote_event(EVENT_URI, name, "published"))
}

fn update(seq: i64, name: &str) -> PeerChange {
    peer_change(seq, ChangeAction::Update, remote_event(EVENT_URI, name, "published"))
}

fn delete(seq: i64, uri: &str) -> PeerChange {
    peer_change(seq, ChangeAction::Delete, remote_event(uri, "gone", "deleted"))
}

fn created_id(outcome: &SyncOutcome) -> uuid::Uuid {
    match outcome {
        SyncOutcome::Created { entity_id } => *entity_id,
        other => panic!("expected Created, got {:?}", other),
    }
}

#[tokio::test]
async fn retried_push_replays_the_stored_response() {
    let state = with_peer().await;
    let batch = vec![create(1, "Jazz Fest Opening")];

    let first = state.federation.sync(PEER, &batch, Some("push-1")).await.unwrap();
    let second = state.federation.sync(PEER, &batch, Some("push-1")).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.results, first.results);
    assert_eq!(first.cursor, 1);

    let entity_id = created_id(&first.results[0].outcome);
    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 1);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.federation_uri.as_deref(), Some(EVENT_URI));
    assert_eq!(entity.origin_peer.as_deref(), Some(PEER));
    assert_eq!(entity.remote_sequence, Some(1));
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
    assert_eq!(changes::list_for_entity(&mut conn, entity_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn redelivered_change_without_request_key_is_not_reapplied() {
    let state = with_peer().await;
    let batch = vec![create(1, "Film Festival")];

    let first = state.federation.sync(PEER, &batch, None).await.unwrap();
    let second = state.federation.sync(PEER, &batch, None).await.unwrap();

    assert!(!second.replayed);
    assert!(second.results[0].replayed);
    assert_eq!(second.results[0].outcome, first.results[0].outcome);
    assert_eq!(second.results[0].idempotency_key, "montreal:1");
    assert_eq!(count_rows(&state, "change_feed", "").await, 1);
}

#[tokio::test]
async fn same_request_key_with_different_body_conflicts() {
    let state = with_peer().await;
    state
        .federation
        .sync(PEER, &[create(1, "Night Market")], Some("push-7"))
        .await
        .unwrap();

    let err = state
        .federation
        .sync(PEER, &[update(2, "Night Market Extended")], Some("push-7"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn newer_update_applies_and_older_one_is_ignored() {
    let state = with_peer().await;
    let created = state.federation.sync(PEER, &[create(1, "Poetry Slam")], None).await.unwrap();
    let entity_id = created_id(&created.results[0].outcome);

    let result = state
        .federation
        .sync(PEER, &[update(5, "Poetry Slam Finals"), update(3, "Poetry Slam Semis")], None)
        .await
        .unwrap();

    assert_eq!(result.results[0].outcome, SyncOutcome::Updated { entity_id });
    match &result.results[1].outcome {
        SyncOutcome::Ignored { reason } => assert!(reason.starts_with("stale"), "{}", reason),
        other => panic!("expected stale change to be ignored, got {:?}", other),
    }
    assert_eq!(result.cursor, 5);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.name, "Poetry Slam Finals");
    assert_eq!(entity.remote_sequence, Some(5));

    let feed = changes::list_for_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[1].action, ChangeAction::Update);
}

#[tokio::test]
async fn deleted_entities_are_never_resurrected() {
    let state = with_peer().await;
    let created = state.federation.sync(PEER, &[create(1, "Craft Fair")], None).await.unwrap();
    let entity_id = created_id(&created.results[0].outcome);

    let deleted = state.federation.sync(PEER, &[delete(2, EVENT_URI)], None).await.unwrap();
    assert_eq!(deleted.results[0].outcome, SyncOutcome::Deleted { entity_id });

    let late = state.federation.sync(PEER, &[update(3, "Craft Fair Returns")], None).await.unwrap();
    assert_eq!(
        late.results[0].outcome,
        SyncOutcome::Ignored {
            reason: "entity was deleted".to_string()
        }
    );

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Deleted);
    let tombstone = tombstones::find_by_uri(&mut conn, EVENT_URI).await.unwrap().unwrap();
    assert_eq!(tombstone.reason, "federated_delete");
}

#[tokio::test]
async fn delete_for_unknown_entity_only_records_tombstone() {
    let state = with_peer().await;
    let uri = "https://events.montreal.example/events/99";

    let result = state.federation.sync(PEER, &[delete(1, uri)], None).await.unwrap();
    assert!(matches!(result.results[0].outcome, SyncOutcome::Ignored { .. }));
    assert_eq!(count_rows(&state, "entities", "").await, 0);

    // A create arriving late for the same URI stays dead
    let create_late = peer_change(2, ChangeAction::Create, remote_event(uri, "Ghost Show", "published"));
    let result = state.federation.sync(PEER, &[create_late], None).await.unwrap();
    assert!(matches!(result.results[0].outcome, SyncOutcome::Ignored { .. }));
    assert_eq!(count_rows(&state, "entities", "").await, 0);
}

#[tokio::test]
async fn pending_remote_entities_arrive_as_drafts() {
    let state = with_peer().await;
    let change = peer_change(
        1,
        ChangeAction::Create,
        remote_event(EVENT_URI, "Unreviewed Gig", "pending_review"),
    );
    let result = state.federation.sync(PEER, &[change], None).await.unwrap();
    let entity_id = created_id(&result.results[0].outcome);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Draft);
    assert!(entity.fields.get("lifecycleState").is_none());
}

/// A remote event running from `start` to `end` on the same calendar day
fn remote_event_with_end(uri: &str, name: &str, start: &str, end: &str) -> Value {
    let day = future_day(40);
    let fields = json!({
        "name": name,
        "description": "Shared by a peer",
        "startDate": at(&day, start),
        "endDate": at(&day, end),
        "location": {"name": "Place des Arts", "addressLocality": "Montreal"},
        "lifecycleState": "published"
    });
    frame("Event", uri, fields.as_object().unwrap())
}

#[tokio::test]
async fn overnight_remote_event_is_repaired_and_published() {
    let state = with_peer().await;
    let change = peer_change(
        1,
        ChangeAction::Create,
        remote_event_with_end(EVENT_URI, "Late Set", "23:00", "02:00"),
    );
    let result = state.federation.sync(PEER, &[change], None).await.unwrap();
    let entity_id = created_id(&result.results[0].outcome);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
    let (start, end) = (entity.start_time.unwrap(), entity.end_time.unwrap());
    assert!(end > start);
    assert_eq!((end - start).num_hours(), 3);
}

#[tokio::test]
async fn doubtful_remote_date_repair_is_held_as_draft() {
    let state = with_peer().await;
    let change = peer_change(
        1,
        ChangeAction::Create,
        remote_event_with_end(EVENT_URI, "Reversed Matinee", "23:00", "10:00"),
    );
    let result = state.federation.sync(PEER, &[change], None).await.unwrap();
    let entity_id = created_id(&result.results[0].outcome);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.lifecycle_state, LifecycleState::Draft);
    let (start, end) = (entity.start_time.unwrap(), entity.end_time.unwrap());
    assert!(end >= start);
    assert_eq!((end - start).num_hours(), 11);
}

#[tokio::test]
async fn reused_sequence_with_different_content_conflicts() {
    let state = with_peer().await;
    let first = state
        .federation
        .sync(PEER, &[create(1, "Harbour Lights")], None)
        .await
        .unwrap();
    let entity_id = created_id(&first.results[0].outcome);

    let second = state
        .federation
        .sync(PEER, &[update(1, "Harbour Lights Cancelled")], None)
        .await
        .unwrap();
    let item = &second.results[0];
    assert!(matches!(item.outcome, SyncOutcome::Conflict { .. }));
    assert!(!item.replayed);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.name, "Harbour Lights");
    drop(conn);
    assert_eq!(count_rows(&state, "change_feed", "").await, 1);
}

#[tokio::test]
async fn echo_of_a_local_entity_is_kept_as_source_only() {
    let state = with_peer().await;
    let local = state
        .coordinator
        .ingest(
            &event_payload("Harbourfront Dance", &at(&future_day(18), "18:00"), None, "Harbourfront"),
            &source("harbourfront"),
        )
        .await
        .unwrap();

    let uri = {
        let mut conn = state.store.read().await.unwrap();
        entities::require_entity(&mut conn, local.entity_id).await.unwrap().uri(BASE_URL)
    };
    let echo = peer_change(7, ChangeAction::Update, remote_event(&uri, "Renamed By Peer", "published"));
    let result = state.federation.sync(PEER, &[echo], None).await.unwrap();
    assert_eq!(
        result.results[0].outcome,
        SyncOutcome::SourceRecorded {
            entity_id: local.entity_id
        }
    );

    // Deletes from peers never touch local entities
    let result = state.federation.sync(PEER, &[delete(8, &uri)], None).await.unwrap();
    assert!(matches!(result.results[0].outcome, SyncOutcome::Ignored { .. }));

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, local.entity_id).await.unwrap();
    assert_eq!(entity.name, "Harbourfront Dance");
    assert_eq!(entity.lifecycle_state, LifecycleState::Published);
    let records = provenance::list_source_records(&mut conn, local.entity_id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.source_id == "peer:montreal"));
}

#[tokio::test]
async fn unsupported_snapshots_are_ignored_not_failed() {
    let state = with_peer().await;
    let fields = json!({"name": "Somebody"});
    let person = frame("Person", "https://events.montreal.example/people/1", fields.as_object().unwrap());

    let result = state
        .federation
        .sync(PEER, &[peer_change(1, ChangeAction::Create, person)], None)
        .await
        .unwrap();
    assert!(matches!(result.results[0].outcome, SyncOutcome::Ignored { .. }));
}

#[tokio::test]
async fn remote_places_replicate_too() {
    let state = with_peer().await;
    let fields = json!({"name": "Place des Arts", "addressLocality": "Montreal"});
    let place = frame("Place", "https://events.montreal.example/places/3", fields.as_object().unwrap());

    let result = state
        .federation
        .sync(PEER, &[peer_change(1, ChangeAction::Create, place)], None)
        .await
        .unwrap();
    let entity_id = created_id(&result.results[0].outcome);

    let mut conn = state.store.read().await.unwrap();
    let entity = entities::require_entity(&mut conn, entity_id).await.unwrap();
    assert_eq!(entity.kind, EntityKind::Place);
    assert_eq!(entity.locality.as_deref(), Some("Montreal"));
}

#[tokio::test]
async fn unknown_or_disabled_peers_are_refused() {
    let state = with_peer().await;

    let err = state.federation.sync("nobody", &[create(1, "x")], None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    state
        .federation
        .register_peer("paused", "paused.example", "https://paused.example", 5, false)
        .await
        .unwrap();
    let err = state.federation.sync("paused", &[create(1, "x")], None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = state
        .federation
        .register_peer("  ", "blank.example", "https://blank.example", 5, true)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let peers = state.federation.list_peers().await.unwrap();
    assert_eq!(peers.len(), 2);
}

#[tokio::test]
async fn cleanup_drops_expired_keys() {
    let state = with_peer().await;
    state
        .federation
        .sync(PEER, &[create(1, "Book Launch")], Some("push-1"))
        .await
        .unwrap();
    assert_eq!(count_rows(&state, "sync_idempotency", "").await, 2);

    // Inside the retention window nothing goes
    assert_eq!(state.federation.cleanup(chrono::Utc::now()).await.unwrap(), 0);

    let later = chrono::Utc::now() + chrono::Duration::hours(25);
    assert_eq!(state.federation.cleanup(later).await.unwrap(), 2);
    assert_eq!(count_rows(&state, "sync_idempotency", "").await, 0);

    // Re-sent after expiry: applied afresh, and the sequence check keeps it harmless
    let again = state
        .federation
        .sync(PEER, &[create(1, "Book Launch")], Some("push-1"))
        .await
        .unwrap();
    assert!(!again.replayed);
    assert!(matches!(again.results[0].outcome, SyncOutcome::Ignored { .. }));
    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 1);
}
