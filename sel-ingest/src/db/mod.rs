//! Persistence for the ingest service
//!
//! Every function takes `&mut SqliteConnection` so the same code runs inside a
//! write transaction (`tx.conn()`) or on a pooled read connection. `Store`
//! owns the pool and the write gate.

pub mod batches;
pub mod changes;
pub mod duplicates;
pub mod entities;
pub mod idempotency;
pub mod nodes;
pub mod provenance;
pub mod review;
pub mod tombstones;

use chrono::{DateTime, SecondsFormat, Utc};
use sel_common::{Error, Result};
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::utils::{begin_monitored, MonitoredTransaction};

/// Shared handle to the canonical store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    max_lock_wait_ms: u64,
}

impl Store {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    /// Begin a write transaction. Writers in this process are serialized by
    /// the gate; readers never wait on it.
    pub async fn begin_write(&self, caller: &'static str) -> Result<MonitoredTransaction> {
        begin_monitored(&self.pool, &self.write_gate, caller).await
    }

    /// Pooled connection for reads outside any transaction
    pub async fn read(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }
}

/// Fixed-width UTC timestamp; lexical order equals chronological order
pub fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

pub fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

pub fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse id '{}': {}", value, e)))
}

pub fn parse_opt_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

pub fn to_json_text<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Map a uniqueness violation to `Conflict`, pass everything else through
pub fn conflict_on_unique(err: sqlx::Error, what: &str) -> Error {
    let err = Error::Database(err);
    if err.is_unique_violation() {
        Error::Conflict(format!("{} already exists", what))
    } else {
        err
    }
}
