//! Change feed persistence

use chrono::{DateTime, Utc};
use sel_common::Result;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_ts, parse_uuid, ts};
use crate::models::{CanonicalEntity, ChangeAction, ChangeEntry};

fn change_from_row(row: &SqliteRow) -> Result<ChangeEntry> {
    let changed_fields: String = row.get("changed_fields");
    let snapshot: String = row.get("snapshot");
    Ok(ChangeEntry {
        sequence_number: row.get("sequence_number"),
        entity_id: parse_uuid(row.get("entity_id"))?,
        entity_kind: row.get::<String, _>("entity_kind").parse()?,
        action: row.get::<String, _>("action").parse()?,
        changed_fields: serde_json::from_str(&changed_fields)?,
        snapshot: serde_json::from_str(&snapshot)?,
        created_at: parse_ts(row.get("created_at"))?,
    })
}

/// Append one entry describing the mutation just applied to `entity`.
///
/// Must run on the connection of the transaction that performed the
/// mutation: the sequence number is allocated by the same statement, so the
/// entry and the canonical state commit or vanish together and numbering
/// never skips.
pub async fn append_change(
    conn: &mut SqliteConnection,
    entity: &CanonicalEntity,
    action: ChangeAction,
    changed_fields: &[String],
    superseded_by: Option<&str>,
    base_url: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let mut snapshot = entity.to_linked_data(base_url);
    if let (Some(winner), Value::Object(map)) = (superseded_by, &mut snapshot) {
        map.insert("supersededBy".to_string(), Value::String(winner.to_string()));
    }

    let sequence: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO change_feed (
            sequence_number, entity_id, entity_kind, action, changed_fields, snapshot, created_at
        ) VALUES (
            (SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM change_feed), ?, ?, ?, ?, ?, ?
        )
        RETURNING sequence_number
        "#,
    )
    .bind(entity.id.to_string())
    .bind(entity.kind.as_str())
    .bind(action.as_str())
    .bind(serde_json::to_string(changed_fields)?)
    .bind(serde_json::to_string(&sel_common::linked_data::canonicalize(&snapshot))?)
    .bind(ts(&now))
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(
        sequence,
        entity_id = %entity.id,
        action = action.as_str(),
        "Change feed entry appended"
    );
    Ok(sequence)
}

/// Entries after `after_sequence`, oldest first
pub async fn list_changes(
    conn: &mut SqliteConnection,
    after_sequence: i64,
    limit: i64,
    action: Option<ChangeAction>,
) -> Result<Vec<ChangeEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM change_feed
        WHERE sequence_number > ? AND (? IS NULL OR action = ?)
        ORDER BY sequence_number
        LIMIT ?
        "#,
    )
    .bind(after_sequence)
    .bind(action.map(|a| a.as_str()))
    .bind(action.map(|a| a.as_str()))
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(change_from_row).collect()
}

pub async fn latest_sequence(conn: &mut SqliteConnection) -> Result<i64> {
    let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence_number) FROM change_feed")
        .fetch_one(&mut *conn)
        .await?;
    Ok(seq.unwrap_or(0))
}

pub async fn list_for_entity(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Vec<ChangeEntry>> {
    let rows = sqlx::query("SELECT * FROM change_feed WHERE entity_id = ? ORDER BY sequence_number")
        .bind(entity_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(change_from_row).collect()
}
