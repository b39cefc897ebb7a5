//! Duplicate candidates surfaced to admins

use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::{parse_ts, parse_uuid, ts};
use crate::models::EntityKind;

/// Which dedup layer produced the candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateLayer {
    /// Event text similarity between surfacing and auto-merge thresholds
    NearDuplicate,
    /// New place/organization that resembles an existing one
    SimilarEntity,
}

impl CandidateLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateLayer::NearDuplicate => "near_duplicate",
            CandidateLayer::SimilarEntity => "similar_entity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub id: i64,
    pub entity_id: Uuid,
    pub candidate_id: Uuid,
    pub kind: EntityKind,
    pub score: f64,
    pub layer: CandidateLayer,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub async fn record_candidate(
    conn: &mut SqliteConnection,
    entity_id: Uuid,
    candidate_id: Uuid,
    kind: EntityKind,
    score: f64,
    layer: CandidateLayer,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO duplicate_candidates (entity_id, candidate_id, kind, score, layer, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity_id, candidate_id) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(entity_id.to_string())
    .bind(candidate_id.to_string())
    .bind(kind.as_str())
    .bind(score)
    .bind(layer.as_str())
    .bind(ts(&now))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_open(
    conn: &mut SqliteConnection,
    kind: Option<EntityKind>,
) -> Result<Vec<DuplicateCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM duplicate_candidates
        WHERE status = 'open' AND (? IS NULL OR kind = ?)
        ORDER BY score DESC, id
        "#,
    )
    .bind(kind.map(|k| k.as_str()))
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let layer = match row.get::<String, _>("layer").as_str() {
                "near_duplicate" => CandidateLayer::NearDuplicate,
                _ => CandidateLayer::SimilarEntity,
            };
            Ok(DuplicateCandidate {
                id: row.get("id"),
                entity_id: parse_uuid(row.get("entity_id"))?,
                candidate_id: parse_uuid(row.get("candidate_id"))?,
                kind: row.get::<String, _>("kind").parse()?,
                score: row.get("score"),
                layer,
                status: row.get("status"),
                created_at: parse_ts(row.get("created_at"))?,
            })
        })
        .collect()
}

pub async fn dismiss(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let result = sqlx::query("UPDATE duplicate_candidates SET status = 'dismissed' WHERE id = ? AND status = 'open'")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("open duplicate candidate {}", id)));
    }
    Ok(())
}

/// Close every open candidate pairing `a` and `b` after they were merged
pub async fn mark_merged(conn: &mut SqliteConnection, a: Uuid, b: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE duplicate_candidates SET status = 'merged'
        WHERE status = 'open'
          AND ((entity_id = ? AND candidate_id = ?) OR (entity_id = ? AND candidate_id = ?))
        "#,
    )
    .bind(a.to_string())
    .bind(b.to_string())
    .bind(b.to_string())
    .bind(a.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
