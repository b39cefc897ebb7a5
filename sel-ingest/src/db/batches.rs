//! Batch submissions and per-item progress

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_opt_ts, parse_opt_uuid, parse_ts, ts};
use crate::models::{BatchItemResult, BatchItemStatus, BatchStatus, SourceMeta};

/// Stored batch header
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub id: Uuid,
    pub source: SourceMeta,
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Item still waiting to be ingested
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub index: i64,
    pub payload: Value,
}

pub async fn create_batch(
    conn: &mut SqliteConnection,
    id: Uuid,
    source: &SourceMeta,
    items: &[Value],
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO batches (id, source, item_count, created_at) VALUES (?, ?, ?, ?)")
        .bind(id.to_string())
        .bind(serde_json::to_string(source)?)
        .bind(items.len() as i64)
        .bind(ts(&now))
        .execute(&mut *conn)
        .await?;

    for (index, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO batch_items (batch_id, item_index, payload, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(index as i64)
        .bind(serde_json::to_string(item)?)
        .bind(ts(&now))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn get_batch(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<BatchRecord>> {
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let source: String = row.get("source");
    Ok(Some(BatchRecord {
        id,
        source: serde_json::from_str(&source)?,
        item_count: row.get("item_count"),
        created_at: parse_ts(row.get("created_at"))?,
        completed_at: parse_opt_ts(row.get("completed_at"))?,
    }))
}

pub async fn pending_items(conn: &mut SqliteConnection, id: Uuid) -> Result<Vec<PendingItem>> {
    let rows = sqlx::query(
        "SELECT item_index, payload FROM batch_items WHERE batch_id = ? AND status = 'pending' ORDER BY item_index",
    )
    .bind(id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let payload: String = row.get("payload");
            Ok(PendingItem {
                index: row.get("item_index"),
                payload: serde_json::from_str(&payload)?,
            })
        })
        .collect()
}

pub async fn record_item(
    conn: &mut SqliteConnection,
    batch_id: Uuid,
    result: &BatchItemResult,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE batch_items
        SET status = ?, entity_id = ?, review_id = ?, message = ?, details = ?, updated_at = ?
        WHERE batch_id = ? AND item_index = ?
        "#,
    )
    .bind(result.status.as_str())
    .bind(result.entity_id.map(|id| id.to_string()))
    .bind(result.review_id)
    .bind(&result.message)
    .bind(result.details.as_ref().map(serde_json::to_string).transpose()?)
    .bind(ts(&now))
    .bind(batch_id.to_string())
    .bind(result.index)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mark_complete(conn: &mut SqliteConnection, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE batches SET completed_at = ? WHERE id = ? AND completed_at IS NULL")
        .bind(ts(&now))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn item_from_row(row: &SqliteRow) -> Result<BatchItemResult> {
    let details: Option<String> = row.get("details");
    Ok(BatchItemResult {
        index: row.get("item_index"),
        status: row.get::<String, _>("status").parse()?,
        entity_id: parse_opt_uuid(row.get("entity_id"))?,
        review_id: row.get("review_id"),
        message: row.get("message"),
        details: details.as_deref().map(serde_json::from_str).transpose()?,
    })
}

pub async fn batch_status(conn: &mut SqliteConnection, id: Uuid) -> Result<BatchStatus> {
    let batch = get_batch(conn, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("batch {}", id)))?;

    let rows = sqlx::query(
        "SELECT item_index, status, entity_id, review_id, message, details FROM batch_items WHERE batch_id = ? ORDER BY item_index",
    )
    .bind(id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let items = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;
    let completed = items.iter().filter(|i| i.status.is_final()).count();

    Ok(BatchStatus {
        batch_id: id,
        total: items.len(),
        completed,
        created_at: batch.created_at,
        completed_at: batch.completed_at,
        items,
    })
}
