//! Lookup cache port
//!
//! Long-lived lookups (geocoding results) go through `LookupCache` so the
//! pipeline never holds a process-global cache and tests can substitute an
//! in-memory one.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sel_common::Result;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::db::{ts, Store};
use crate::utils::retry_on_lock;

/// Default lifetime of a cached lookup
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

#[async_trait]
pub trait LookupCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value`; `ttl` of `None` uses the cache default
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Default entry lifetime
    fn ttl(&self) -> Duration;

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<u64>;
}

/// Concurrent in-memory cache. Entries are sharded by key hash; expired
/// entries are dropped on read and by `evict_expired`.
pub struct InMemoryCache {
    entries: DashMap<String, (Value, Instant)>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - self.entries.len()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[async_trait]
impl LookupCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if hit {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = Instant::now() + ttl.unwrap_or(self.ttl);
        self.entries.insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(self.evict_expired() as u64)
    }
}

/// Cache persisted in the `lookup_cache` table, surviving restarts
pub struct SqliteLookupCache {
    store: Store,
    ttl: Duration,
}

impl SqliteLookupCache {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

#[async_trait]
impl LookupCache for SqliteLookupCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.store.read().await?;
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM lookup_cache WHERE cache_key = ? AND expires_at > ?")
                .bind(key)
                .bind(ts(&Utc::now()))
                .fetch_optional(&mut *conn)
                .await?;

        Ok(value.map(|v| serde_json::from_str(&v)).transpose()?)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let ttl = ChronoDuration::from_std(ttl.unwrap_or(self.ttl)).unwrap_or(ChronoDuration::days(30));
        let expires_at = Utc::now() + ttl;
        let text = serde_json::to_string(&value)?;

        retry_on_lock("cache_put", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("cache_put").await?;
            sqlx::query(
                r#"
                INSERT INTO lookup_cache (cache_key, value, expires_at) VALUES (?, ?, ?)
                ON CONFLICT(cache_key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
                "#,
            )
            .bind(key)
            .bind(&text)
            .bind(ts(&expires_at))
            .execute(tx.conn())
            .await?;
            tx.commit().await
        })
        .await
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn purge_expired(&self) -> Result<u64> {
        retry_on_lock("cache_purge", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("cache_purge").await?;
            let result = sqlx::query("DELETE FROM lookup_cache WHERE expires_at <= ?")
                .bind(ts(&Utc::now()))
                .execute(tx.conn())
                .await?;
            tx.commit().await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
