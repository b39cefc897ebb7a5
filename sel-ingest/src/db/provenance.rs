//! Source records and field provenance

use chrono::{DateTime, Utc};
use sel_common::Result;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_ts, parse_uuid, ts};
use crate::models::{FieldProvenance, SourceMeta, SourceRecord};

fn source_record_from_row(row: &SqliteRow) -> Result<SourceRecord> {
    let payload: String = row.get("payload");
    Ok(SourceRecord {
        id: row.get("id"),
        entity_id: parse_uuid(row.get("entity_id"))?,
        source_id: row.get("source_id"),
        external_id: row.get("external_id"),
        producer: row.get::<String, _>("producer").parse()?,
        payload: serde_json::from_str(&payload)?,
        payload_hash: row.get("payload_hash"),
        trust_level: row.get::<i64, _>("trust_level") as u8,
        first_seen_at: parse_ts(row.get("first_seen_at"))?,
        retrieved_at: parse_ts(row.get("retrieved_at"))?,
    })
}

/// Append a source record and return its id
pub async fn insert_source_record(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    source: &SourceMeta,
    payload: &Value,
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO source_records (
            entity_id, source_id, external_id, producer, payload, payload_hash,
            trust_level, first_seen_at, retrieved_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(entity_id.to_string())
    .bind(&source.source_id)
    .bind(&source.external_id)
    .bind(source.producer.as_str())
    .bind(serde_json::to_string(payload)?)
    .bind(payload_hash)
    .bind(i64::from(source.trust_level))
    .bind(ts(&now))
    .bind(ts(&now))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| super::conflict_on_unique(e, "source record"))?;

    Ok(id)
}

/// Exact-hash lookup: the record this source already submitted with this hash
pub async fn find_by_hash(
    conn: &mut SqliteConnection,
    source_id: &str,
    payload_hash: &str,
) -> Result<Option<SourceRecord>> {
    let row = sqlx::query("SELECT * FROM source_records WHERE source_id = ? AND payload_hash = ?")
        .bind(source_id)
        .bind(payload_hash)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(source_record_from_row).transpose()
}

/// Refresh the retrieval time of an identical resubmission
pub async fn touch_source_record(
    conn: &mut SqliteConnection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE source_records SET retrieved_at = ? WHERE id = ?")
        .bind(ts(&now))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_source_records(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Vec<SourceRecord>> {
    let rows = sqlx::query("SELECT * FROM source_records WHERE entity_id = ? ORDER BY id")
        .bind(entity_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(source_record_from_row).collect()
}

/// One observed field value
pub struct FieldObservation<'a> {
    pub field_path: &'a str,
    pub value_hash: String,
    pub confidence: f64,
    pub applied: bool,
}

/// Record observations from one source record. When an observation is
/// applied, earlier applied rows for that field stop being applied.
pub async fn record_fields(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    source_record_id: i64,
    trust_level: u8,
    observations: &[FieldObservation<'_>],
    now: DateTime<Utc>,
) -> Result<()> {
    for obs in observations {
        if obs.applied {
            sqlx::query(
                "UPDATE field_provenance SET applied = 0 WHERE entity_id = ? AND field_path = ? AND applied = 1",
            )
            .bind(entity_id.to_string())
            .bind(obs.field_path)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO field_provenance (
                entity_id, field_path, value_hash, source_record_id, trust_level,
                confidence, observed_at, applied
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity_id.to_string())
        .bind(obs.field_path)
        .bind(&obs.value_hash)
        .bind(source_record_id)
        .bind(i64::from(trust_level))
        .bind(obs.confidence)
        .bind(ts(&now))
        .bind(obs.applied)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Trust of the source whose value a field currently holds, if any
pub async fn applied_trust(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    field_path: &str,
) -> Result<Option<u8>> {
    let trust: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT MAX(trust_level) FROM field_provenance
        WHERE entity_id = ? AND field_path = ? AND applied = 1
        "#,
    )
    .bind(entity_id.to_string())
    .bind(field_path)
    .fetch_one(&mut *conn)
    .await?;

    Ok(trust.map(|t| t as u8))
}

pub async fn list_field_provenance(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Vec<FieldProvenance>> {
    let rows = sqlx::query("SELECT * FROM field_provenance WHERE entity_id = ? ORDER BY id")
        .bind(entity_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(FieldProvenance {
                id: row.get("id"),
                entity_id: parse_uuid(row.get("entity_id"))?,
                field_path: row.get("field_path"),
                value_hash: row.get("value_hash"),
                source_record_id: row.get("source_record_id"),
                trust_level: row.get::<i64, _>("trust_level") as u8,
                confidence: row.get("confidence"),
                observed_at: parse_ts(row.get("observed_at"))?,
                applied: row.get("applied"),
            })
        })
        .collect()
}

/// Move source records and field provenance from `from` to `to`.
///
/// `adopted_fields` are the fields the winner took from the loser; their
/// applied flags move along, every other loser attribution stops being applied.
pub async fn reparent(
    conn: &mut SqliteConnection,
    from: Uuid,
    to: Uuid,
    adopted_fields: &[String],
) -> Result<u64> {
    let applied_paths: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT field_path FROM field_provenance WHERE entity_id = ? AND applied = 1",
    )
    .bind(from.to_string())
    .fetch_all(&mut *conn)
    .await?;

    for path in applied_paths.iter().filter(|p| !adopted_fields.contains(p)) {
        sqlx::query(
            "UPDATE field_provenance SET applied = 0 WHERE entity_id = ? AND field_path = ?",
        )
        .bind(from.to_string())
        .bind(path)
        .execute(&mut *conn)
        .await?;
    }

    for path in adopted_fields {
        sqlx::query(
            "UPDATE field_provenance SET applied = 0 WHERE entity_id = ? AND field_path = ?",
        )
        .bind(to.to_string())
        .bind(path)
        .execute(&mut *conn)
        .await?;
    }

    let moved = sqlx::query("UPDATE source_records SET entity_id = ? WHERE entity_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?
        .rows_affected();

    sqlx::query("UPDATE field_provenance SET entity_id = ? WHERE entity_id = ?")
        .bind(to.to_string())
        .bind(from.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(moved)
}

/// Attach an existing source record to another entity and refresh its
/// retrieval time. Used when a submission is replayed after the entity it
/// first produced was deleted.
pub async fn reassign_source_record(
    conn: &mut SqliteConnection,
    id: i64,
    entity_id: Uuid,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE source_records SET entity_id = ?, retrieved_at = ? WHERE id = ?")
        .bind(entity_id.to_string())
        .bind(ts(&now))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
