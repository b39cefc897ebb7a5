//! Change feed ordering and paging

mod helpers;

use helpers::*;
use sel_common::Error;
use sel_ingest::models::ChangeAction;
use sel_ingest::services::change_feed::{decode_cursor, encode_cursor};
use tokio::task::JoinSet;

#[tokio::test]
async fn pages_forward_without_gaps() {
    let state = create_test_state().await;
    for i in 0..5 {
        let start = at(&future_day(3 + i), "18:00");
        state
            .coordinator
            .ingest(&virtual_event_payload(&format!("Webinar {}", i), &start), &source("online"))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = state.changes.list(cursor.as_deref(), Some(2), None).await.unwrap();
        seen.extend(page.changes.iter().map(|c| c.sequence_number));
        cursor = Some(page.next_cursor.clone());
        if !page.has_more {
            break;
        }
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);

    // Polling again from the end returns nothing and keeps the position
    let tail = state.changes.list(cursor.as_deref(), Some(2), None).await.unwrap();
    assert!(tail.changes.is_empty());
    assert_eq!(Some(tail.next_cursor), cursor);
    assert_eq!(state.changes.latest_sequence().await.unwrap(), 5);
}

#[tokio::test]
async fn old_cursor_replays_entries_again() {
    let state = create_test_state().await;
    for i in 0..3 {
        state
            .coordinator
            .ingest(
                &virtual_event_payload(&format!("Stream {}", i), &at(&future_day(5 + i), "12:00")),
                &source("stream"),
            )
            .await
            .unwrap();
    }

    let from_one = encode_cursor(1);
    let first = state.changes.list(Some(&from_one), None, None).await.unwrap();
    let again = state.changes.list(Some(&from_one), None, None).await.unwrap();
    assert_eq!(first.changes.len(), 2);
    assert_eq!(
        first.changes.iter().map(|c| c.sequence_number).collect::<Vec<_>>(),
        again.changes.iter().map(|c| c.sequence_number).collect::<Vec<_>>()
    );
    assert_eq!(decode_cursor(&first.next_cursor).unwrap(), 3);
}

#[tokio::test]
async fn filters_by_action() {
    let state = create_test_state().await;
    let outcome = state
        .coordinator
        .ingest(
            &virtual_event_payload("Cancelled Talk", &at(&future_day(8), "10:00")),
            &source("talks"),
        )
        .await
        .unwrap();
    state
        .coordinator
        .delete_entity(outcome.entity_id, Some("cancelled by organizer"))
        .await
        .unwrap();

    let deletes = state
        .changes
        .list(None, None, Some(ChangeAction::Delete))
        .await
        .unwrap();
    assert_eq!(deletes.changes.len(), 1);
    assert_eq!(deletes.changes[0].entity_id, outcome.entity_id);
    assert_eq!(deletes.changes[0].snapshot["lifecycleState"], "deleted");
}

#[tokio::test]
async fn malformed_cursor_is_rejected() {
    let state = create_test_state().await;
    let err = state.changes.list(Some("not-a-cursor!"), None, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn concurrent_writers_get_distinct_increasing_sequences() {
    let (_dir, state) = create_file_state().await;

    let mut tasks = JoinSet::new();
    for i in 0..12 {
        let state = state.clone();
        tasks.spawn(async move {
            let payload = virtual_event_payload(
                &format!("Parallel Session {}", i),
                &at(&future_day(2 + i), "09:00"),
            );
            state
                .coordinator
                .ingest(&payload, &source(&format!("producer-{}", i)))
                .await
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let page = state.changes.list(None, Some(100), None).await.unwrap();
    let sequences: Vec<i64> = page.changes.iter().map(|c| c.sequence_number).collect();
    assert_eq!(sequences, (1..=12).collect::<Vec<i64>>());
    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 12);
}

#[tokio::test]
async fn concurrent_identical_submissions_collapse_to_one_entity() {
    let (_dir, state) = create_file_state().await;
    let day = future_day(12);
    // Reversed daytime range: held for review
    let mut payload = virtual_event_payload("Lunchtime Lecture", &at(&day, "13:00"));
    payload["endDate"] = serde_json::json!(at(&day, "11:00"));

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let state = state.clone();
        let payload = payload.clone();
        tasks.spawn(async move { state.coordinator.ingest(&payload, &source("lecture-feed")).await });
    }

    let mut entity_ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        entity_ids.push(joined.unwrap().unwrap().entity_id);
    }
    entity_ids.dedup();
    assert_eq!(entity_ids.len(), 1);

    assert_eq!(count_rows(&state, "entities", "kind = 'event'").await, 1);
    assert!(count_rows(&state, "review_queue", "status = 'pending'").await <= 1);

    let page = state.changes.list(None, Some(100), None).await.unwrap();
    assert_eq!(page.changes.len(), 1);
    assert_eq!(page.changes[0].entity_id, entity_ids[0]);
    assert_eq!(page.changes[0].action, ChangeAction::Create);
}
