//! Review queue persistence

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::models::{ReviewEntry, ReviewStatus, Warning};

/// Fields of a review entry at creation time
#[derive(Debug, Clone)]
pub struct NewReviewEntry {
    pub entity_id: Uuid,
    pub original_payload: Value,
    pub normalized_payload: Value,
    pub warnings: Vec<Warning>,
    pub dedup_key: Option<String>,
    pub source_key: Option<String>,
    pub payload_hash: String,
    pub effective_start: Option<DateTime<Utc>>,
    pub effective_end: Option<DateTime<Utc>>,
}

/// Reviewer decision applied on a status change
#[derive(Debug, Clone, Default)]
pub struct Decision<'a> {
    pub reviewed_by: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub rejection_reason: Option<&'a str>,
}

fn entry_from_row(row: &SqliteRow) -> Result<ReviewEntry> {
    let original: String = row.get("original_payload");
    let normalized: String = row.get("normalized_payload");
    let warnings: String = row.get("warnings");

    Ok(ReviewEntry {
        id: row.get("id"),
        entity_id: parse_uuid(row.get("entity_id"))?,
        original_payload: serde_json::from_str(&original)?,
        normalized_payload: serde_json::from_str(&normalized)?,
        warnings: serde_json::from_str(&warnings)?,
        dedup_key: row.get("dedup_key"),
        source_key: row.get("source_key"),
        payload_hash: row.get("payload_hash"),
        effective_start: parse_opt_ts(row.get("effective_start"))?,
        effective_end: parse_opt_ts(row.get("effective_end"))?,
        status: row.get::<String, _>("status").parse()?,
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: parse_opt_ts(row.get("reviewed_at"))?,
        review_notes: row.get("review_notes"),
        rejection_reason: row.get("rejection_reason"),
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
    })
}

/// Insert a pending entry. A second pending entry for the same entity
/// violates the partial unique index and comes back as `Conflict`.
pub async fn insert_pending(
    conn: &mut SqliteConnection,
    entry: &NewReviewEntry,
    now: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO review_queue (
            entity_id, original_payload, normalized_payload, warnings, dedup_key, source_key,
            payload_hash, effective_start, effective_end, status, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        RETURNING id
        "#,
    )
    .bind(entry.entity_id.to_string())
    .bind(serde_json::to_string(&entry.original_payload)?)
    .bind(serde_json::to_string(&entry.normalized_payload)?)
    .bind(serde_json::to_string(&entry.warnings)?)
    .bind(&entry.dedup_key)
    .bind(&entry.source_key)
    .bind(&entry.payload_hash)
    .bind(entry.effective_start.as_ref().map(ts))
    .bind(entry.effective_end.as_ref().map(ts))
    .bind(ts(&now))
    .bind(ts(&now))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| super::conflict_on_unique(e, "pending review entry for this entity"))?;

    Ok(id)
}

pub async fn get_entry(conn: &mut SqliteConnection, id: i64) -> Result<Option<ReviewEntry>> {
    let row = sqlx::query("SELECT * FROM review_queue WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

pub async fn require_entry(conn: &mut SqliteConnection, id: i64) -> Result<ReviewEntry> {
    get_entry(conn, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("review entry {}", id)))
}

pub async fn pending_for_entity(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
) -> Result<Option<ReviewEntry>> {
    let row = sqlx::query("SELECT * FROM review_queue WHERE entity_id = ? AND status = 'pending'")
        .bind(entity_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Most recent entry for an entity in `status`
pub async fn latest_for_entity(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    status: ReviewStatus,
) -> Result<Option<ReviewEntry>> {
    let row = sqlx::query(
        "SELECT * FROM review_queue WHERE entity_id = ? AND status = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(entity_id.to_string())
    .bind(status.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Most recent entry in `status` matching either the dedup key or the source key
pub async fn find_by_keys(
    conn: &mut SqliteConnection,
    dedup_key: Option<&str>,
    source_key: Option<&str>,
    status: ReviewStatus,
) -> Result<Option<ReviewEntry>> {
    if dedup_key.is_none() && source_key.is_none() {
        return Ok(None);
    }

    let row = sqlx::query(
        r#"
        SELECT * FROM review_queue
        WHERE status = ? AND (dedup_key = ? OR source_key = ?)
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(status.as_str())
    .bind(dedup_key)
    .bind(source_key)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Replace the payloads and warnings of a still-pending entry
pub async fn update_pending(
    conn: &mut SqliteConnection,
    id: i64,
    entry: &NewReviewEntry,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE review_queue SET
            original_payload = ?, normalized_payload = ?, warnings = ?, dedup_key = ?,
            source_key = COALESCE(?, source_key), payload_hash = ?, effective_start = ?,
            effective_end = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(serde_json::to_string(&entry.original_payload)?)
    .bind(serde_json::to_string(&entry.normalized_payload)?)
    .bind(serde_json::to_string(&entry.warnings)?)
    .bind(&entry.dedup_key)
    .bind(&entry.source_key)
    .bind(&entry.payload_hash)
    .bind(entry.effective_start.as_ref().map(ts))
    .bind(entry.effective_end.as_ref().map(ts))
    .bind(ts(&now))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!("review entry {} is no longer pending", id)));
    }
    Ok(())
}

/// Move a pending entry to a terminal status.
///
/// Guarded on `status = 'pending'` so two reviewers acting at once cannot
/// both succeed.
pub async fn close_entry(
    conn: &mut SqliteConnection,
    id: i64,
    status: ReviewStatus,
    decision: &Decision<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE review_queue SET
            status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?,
            rejection_reason = ?, updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(decision.reviewed_by)
    .bind(ts(&now))
    .bind(decision.notes)
    .bind(decision.rejection_reason)
    .bind(ts(&now))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!("review entry {} is no longer pending", id)));
    }
    Ok(())
}

/// Page through entries by ascending id, starting after `after_id`
pub async fn list_entries(
    conn: &mut SqliteConnection,
    status: Option<ReviewStatus>,
    after_id: i64,
    limit: i64,
) -> Result<Vec<ReviewEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM review_queue
        WHERE id > ? AND (? IS NULL OR status = ?)
        ORDER BY id
        LIMIT ?
        "#,
    )
    .bind(after_id)
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Pending entries whose effective time window ended before `now`
pub async fn expired_pending(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<ReviewEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM review_queue
        WHERE status = 'pending' AND COALESCE(effective_end, effective_start) < ?
        ORDER BY id
        "#,
    )
    .bind(ts(&now))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn delete_entry(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM review_queue WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
