//! Federation sync idempotency cache

use chrono::{DateTime, Utc};
use sel_common::Result;
use sqlx::{Row, SqliteConnection};

use super::ts;

/// A cached response and the hash of the request that produced it
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub request_hash: String,
    pub result: String,
}

pub async fn get(conn: &mut SqliteConnection, key: &str) -> Result<Option<CachedResponse>> {
    let row = sqlx::query("SELECT request_hash, result FROM sync_idempotency WHERE idempotency_key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|row| CachedResponse {
        request_hash: row.get("request_hash"),
        result: row.get("result"),
    }))
}

pub async fn put(
    conn: &mut SqliteConnection,
    key: &str,
    peer_id: &str,
    request_hash: &str,
    result: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_idempotency (idempotency_key, peer_id, request_hash, result, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(key)
    .bind(peer_id)
    .bind(request_hash)
    .bind(result)
    .bind(ts(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| super::conflict_on_unique(e, "idempotency key"))?;
    Ok(())
}

/// Drop entries created before `cutoff`; returns how many were removed
pub async fn purge_older_than(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sync_idempotency WHERE created_at < ?")
        .bind(ts(&cutoff))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
