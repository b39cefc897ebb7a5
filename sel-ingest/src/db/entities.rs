//! Canonical entity persistence

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid, ts};
use crate::models::{CanonicalEntity, EntityKind, LifecycleState};

const ENTITY_COLUMNS: &str = r#"
    id, kind, lifecycle_state, name, normalized_name, fields, payload_hash, dedup_key,
    start_time, end_time, venue_id, organizer_id, locality, latitude, longitude,
    federation_uri, origin_peer, remote_sequence, created_at, updated_at
"#;

/// Name form used for fuzzy matching
pub fn normalize_name(name: &str) -> String {
    sel_common::linked_data::collapse_whitespace(name)
}

fn entity_from_row(row: &SqliteRow) -> Result<CanonicalEntity> {
    let fields: String = row.get("fields");
    let fields: Map<String, Value> = serde_json::from_str(&fields)?;

    Ok(CanonicalEntity {
        id: parse_uuid(row.get("id"))?,
        kind: row.get::<String, _>("kind").parse()?,
        lifecycle_state: row.get::<String, _>("lifecycle_state").parse()?,
        name: row.get("name"),
        fields,
        payload_hash: row.get("payload_hash"),
        dedup_key: row.get("dedup_key"),
        start_time: parse_opt_ts(row.get("start_time"))?,
        end_time: parse_opt_ts(row.get("end_time"))?,
        venue_id: parse_opt_uuid(row.get("venue_id"))?,
        organizer_id: parse_opt_uuid(row.get("organizer_id"))?,
        locality: row.get("locality"),
        latitude: row.get("latitude"),
        longitude: row.get("longitude"),
        federation_uri: row.get("federation_uri"),
        origin_peer: row.get("origin_peer"),
        remote_sequence: row.get("remote_sequence"),
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

pub async fn insert_entity(conn: &mut SqliteConnection, entity: &CanonicalEntity) -> Result<()> {
    let sql = format!(
        "INSERT INTO entities ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        ENTITY_COLUMNS
    );
    sqlx::query(&sql)
        .bind(entity.id.to_string())
        .bind(entity.kind.as_str())
        .bind(entity.lifecycle_state.as_str())
        .bind(&entity.name)
        .bind(normalize_name(&entity.name))
        .bind(serde_json::to_string(&entity.fields)?)
        .bind(&entity.payload_hash)
        .bind(&entity.dedup_key)
        .bind(entity.start_time.as_ref().map(ts))
        .bind(entity.end_time.as_ref().map(ts))
        .bind(entity.venue_id.map(|id| id.to_string()))
        .bind(entity.organizer_id.map(|id| id.to_string()))
        .bind(&entity.locality)
        .bind(entity.latitude)
        .bind(entity.longitude)
        .bind(&entity.federation_uri)
        .bind(&entity.origin_peer)
        .bind(entity.remote_sequence)
        .bind(ts(&entity.created_at))
        .bind(ts(&entity.updated_at))
        .execute(&mut *conn)
        .await
        .map_err(|e| super::conflict_on_unique(e, "entity"))?;

    Ok(())
}

/// Persist every mutable column of `entity`
pub async fn update_entity(conn: &mut SqliteConnection, entity: &CanonicalEntity) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE entities SET
            lifecycle_state = ?, name = ?, normalized_name = ?, fields = ?, payload_hash = ?,
            dedup_key = ?, start_time = ?, end_time = ?, venue_id = ?, organizer_id = ?,
            locality = ?, latitude = ?, longitude = ?, federation_uri = ?, origin_peer = ?,
            remote_sequence = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(entity.lifecycle_state.as_str())
    .bind(&entity.name)
    .bind(normalize_name(&entity.name))
    .bind(serde_json::to_string(&entity.fields)?)
    .bind(&entity.payload_hash)
    .bind(&entity.dedup_key)
    .bind(entity.start_time.as_ref().map(ts))
    .bind(entity.end_time.as_ref().map(ts))
    .bind(entity.venue_id.map(|id| id.to_string()))
    .bind(entity.organizer_id.map(|id| id.to_string()))
    .bind(&entity.locality)
    .bind(entity.latitude)
    .bind(entity.longitude)
    .bind(&entity.federation_uri)
    .bind(&entity.origin_peer)
    .bind(entity.remote_sequence)
    .bind(ts(&entity.updated_at))
    .bind(entity.id.to_string())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("entity {}", entity.id)));
    }
    Ok(())
}

pub async fn get_entity(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<CanonicalEntity>> {
    let sql = format!("SELECT {} FROM entities WHERE id = ?", ENTITY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entity_from_row).transpose()
}

pub async fn require_entity(conn: &mut SqliteConnection, id: Uuid) -> Result<CanonicalEntity> {
    get_entity(conn, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("entity {}", id)))
}

pub async fn find_by_federation_uri(
    conn: &mut SqliteConnection,
    uri: &str,
) -> Result<Option<CanonicalEntity>> {
    let sql = format!("SELECT {} FROM entities WHERE federation_uri = ?", ENTITY_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(uri)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entity_from_row).transpose()
}

/// Live events starting inside `[from, to]`
pub async fn find_events_in_window(
    conn: &mut SqliteConnection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<CanonicalEntity>> {
    let sql = format!(
        r#"
        SELECT {} FROM entities
        WHERE kind = 'event' AND lifecycle_state != 'deleted'
          AND start_time >= ? AND start_time <= ?
        ORDER BY start_time
        "#,
        ENTITY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(ts(&from))
        .bind(ts(&to))
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(entity_from_row).collect()
}

/// Live places or organizations whose normalized name shares a first
/// character with `normalized_name`, or which are in the same locality.
///
/// Fuzzy scoring happens in the caller; this only narrows the candidate set.
pub async fn find_named_candidates(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    normalized_name: &str,
    locality: Option<&str>,
) -> Result<Vec<CanonicalEntity>> {
    let prefix: String = normalized_name.chars().take(1).collect();
    let sql = format!(
        r#"
        SELECT {} FROM entities
        WHERE kind = ? AND lifecycle_state != 'deleted'
          AND (substr(normalized_name, 1, 1) = ? OR (? IS NOT NULL AND lower(locality) = lower(?)))
        "#,
        ENTITY_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(kind.as_str())
        .bind(prefix)
        .bind(locality)
        .bind(locality)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(entity_from_row).collect()
}

/// Number of source records corroborating an entity
pub async fn count_sources(conn: &mut SqliteConnection, id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_records WHERE entity_id = ?")
        .bind(id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Point events that referenced `from` as venue or organizer at `to`.
/// Returns the ids of the events touched.
pub async fn repoint_references(
    conn: &mut SqliteConnection,
    from: Uuid,
    to: Uuid,
) -> Result<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM entities WHERE venue_id = ? OR organizer_id = ?",
    )
    .bind(from.to_string())
    .bind(from.to_string())
    .fetch_all(&mut *conn)
    .await?;

    sqlx::query("UPDATE entities SET venue_id = ? WHERE venue_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE entities SET organizer_id = ? WHERE organizer_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;

    rows.iter().map(|id| parse_uuid(id)).collect()
}

/// Count entities of a kind in a lifecycle state
pub async fn count_in_state(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    state: LifecycleState,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entities WHERE kind = ? AND lifecycle_state = ?",
    )
    .bind(kind.as_str())
    .bind(state.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Places without coordinates; candidates for geocoding
pub async fn places_missing_coordinates(
    conn: &mut SqliteConnection,
    limit: i64,
) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM entities
        WHERE kind = 'place' AND lifecycle_state != 'deleted' AND latitude IS NULL
        ORDER BY created_at
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    ids.iter().map(|id| parse_uuid(id)).collect()
}
