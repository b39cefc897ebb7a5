//! Tombstones and soft deletion

use chrono::{DateTime, Utc};
use sel_common::Result;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{changes, entities, parse_opt_uuid, parse_ts, ts};
use crate::models::{CanonicalEntity, ChangeAction, EntityKind, LifecycleState, Tombstone};

fn tombstone_from_row(row: &SqliteRow) -> Result<Tombstone> {
    let snapshot: Option<String> = row.get("snapshot");
    Ok(Tombstone {
        id: row.get("id"),
        entity_id: parse_opt_uuid(row.get("entity_id"))?,
        entity_uri: row.get("entity_uri"),
        kind: row.get::<String, _>("kind").parse()?,
        deleted_at: parse_ts(row.get("deleted_at"))?,
        reason: row.get("reason"),
        superseded_by: row.get("superseded_by"),
        snapshot: snapshot.as_deref().map(serde_json::from_str).transpose()?,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_tombstone(
    conn: &mut SqliteConnection,
    entity_id: Option<Uuid>,
    entity_uri: &str,
    kind: EntityKind,
    reason: &str,
    superseded_by: Option<&str>,
    snapshot: Option<&Value>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tombstones (entity_id, entity_uri, kind, deleted_at, reason, superseded_by, snapshot)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(entity_id.map(|id| id.to_string()))
    .bind(entity_uri)
    .bind(kind.as_str())
    .bind(ts(&now))
    .bind(reason)
    .bind(superseded_by)
    .bind(snapshot.map(serde_json::to_string).transpose()?)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Latest tombstone recorded for a URI
pub async fn find_by_uri(conn: &mut SqliteConnection, uri: &str) -> Result<Option<Tombstone>> {
    let row = sqlx::query("SELECT * FROM tombstones WHERE entity_uri = ? ORDER BY id DESC LIMIT 1")
        .bind(uri)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(tombstone_from_row).transpose()
}

pub async fn find_for_entity(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Option<Tombstone>> {
    let row = sqlx::query("SELECT * FROM tombstones WHERE entity_id = ? ORDER BY id DESC LIMIT 1")
        .bind(entity_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(tombstone_from_row).transpose()
}

/// Soft-delete `entity`: mark it deleted, write its tombstone and append a
/// `delete` (or `merge`, when superseded) change feed entry.
pub async fn soft_delete(
    conn: &mut SqliteConnection,
    entity: &mut CanonicalEntity,
    reason: &str,
    superseded_by: Option<&str>,
    base_url: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    entity.lifecycle_state = LifecycleState::Deleted;
    entity.updated_at = now;
    entities::update_entity(conn, entity).await?;

    let snapshot = entity.to_linked_data(base_url);
    insert_tombstone(
        conn,
        Some(entity.id),
        &entity.uri(base_url),
        entity.kind,
        reason,
        superseded_by,
        Some(&snapshot),
        now,
    )
    .await?;

    let action = if superseded_by.is_some() {
        ChangeAction::Merge
    } else {
        ChangeAction::Delete
    };
    changes::append_change(
        conn,
        entity,
        action,
        &["lifecycleState".to_string()],
        superseded_by,
        base_url,
        now,
    )
    .await
}
