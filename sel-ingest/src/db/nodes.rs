//! Federation peer registry

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::{parse_opt_ts, parse_ts, ts};
use crate::models::provenance::clamp_trust;
use crate::models::FederationNode;

fn node_from_row(row: &SqliteRow) -> Result<FederationNode> {
    Ok(FederationNode {
        peer_id: row.get("peer_id"),
        node_domain: row.get("node_domain"),
        base_url: row.get("base_url"),
        trust_level: row.get::<i64, _>("trust_level") as u8,
        sync_enabled: row.get("sync_enabled"),
        last_synced_cursor: row.get("last_synced_cursor"),
        last_sync_at: parse_opt_ts(row.get("last_sync_at"))?,
        created_at: parse_ts(row.get("created_at"))?,
    })
}

/// Register a peer, or update its address, trust and enabled flag.
/// The sync cursor of an existing peer is left alone.
pub async fn upsert_node(
    conn: &mut SqliteConnection,
    peer_id: &str,
    node_domain: &str,
    base_url: &str,
    trust_level: u8,
    sync_enabled: bool,
    now: DateTime<Utc>,
) -> Result<FederationNode> {
    sqlx::query(
        r#"
        INSERT INTO federation_nodes (peer_id, node_domain, base_url, trust_level, sync_enabled, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(peer_id) DO UPDATE SET
            node_domain = excluded.node_domain,
            base_url = excluded.base_url,
            trust_level = excluded.trust_level,
            sync_enabled = excluded.sync_enabled
        "#,
    )
    .bind(peer_id)
    .bind(node_domain)
    .bind(base_url)
    .bind(i64::from(clamp_trust(trust_level)))
    .bind(sync_enabled)
    .bind(ts(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| super::conflict_on_unique(e, "peer with this node domain"))?;

    get_node(conn, peer_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("peer {} vanished after upsert", peer_id)))
}

pub async fn get_node(conn: &mut SqliteConnection, peer_id: &str) -> Result<Option<FederationNode>> {
    let row = sqlx::query("SELECT * FROM federation_nodes WHERE peer_id = ?")
        .bind(peer_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(node_from_row).transpose()
}

pub async fn list_nodes(conn: &mut SqliteConnection) -> Result<Vec<FederationNode>> {
    let rows = sqlx::query("SELECT * FROM federation_nodes ORDER BY peer_id")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(node_from_row).collect()
}

/// Advance the peer cursor; it never moves backwards
pub async fn record_sync(
    conn: &mut SqliteConnection,
    peer_id: &str,
    cursor: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE federation_nodes
        SET last_synced_cursor = MAX(last_synced_cursor, ?), last_sync_at = ?
        WHERE peer_id = ?
        "#,
    )
    .bind(cursor)
    .bind(ts(&now))
    .bind(peer_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
