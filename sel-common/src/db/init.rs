//! Database initialization
//!
//! Creates the database on first run, applies connection pragmas and builds
//! every table idempotently before running versioned migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) the database file and bring its schema up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database with the full schema.
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// is pinned to one connection that is never recycled.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes, then run migrations
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_entities_table(pool).await?;
    create_source_records_table(pool).await?;
    create_field_provenance_table(pool).await?;
    create_review_queue_table(pool).await?;
    create_tombstones_table(pool).await?;
    create_change_feed_table(pool).await?;
    create_duplicate_candidates_table(pool).await?;
    create_federation_tables(pool).await?;
    create_jobs_table(pool).await?;
    create_batch_tables(pool).await?;
    create_lookup_cache_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Canonical entities: events, places and organizations.
///
/// `fields` holds the normalized payload as JSON; the scalar columns are
/// projections of it used for lookups.
async fn create_entities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('event', 'place', 'organization')),
            lifecycle_state TEXT NOT NULL
                CHECK (lifecycle_state IN ('draft', 'pending_review', 'published', 'deleted')),
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            fields TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            dedup_key TEXT,
            start_time TIMESTAMP,
            end_time TIMESTAMP,
            venue_id TEXT REFERENCES entities(id),
            organizer_id TEXT REFERENCES entities(id),
            locality TEXT,
            latitude REAL,
            longitude REAL,
            federation_uri TEXT UNIQUE,
            origin_peer TEXT,
            remote_sequence INTEGER,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_kind_start ON entities(kind, start_time)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_dedup_key ON entities(dedup_key)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_source_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(id),
            source_id TEXT NOT NULL,
            external_id TEXT,
            producer TEXT NOT NULL,
            payload TEXT NOT NULL,
            payload_hash TEXT NOT NULL,
            trust_level INTEGER NOT NULL,
            first_seen_at TIMESTAMP NOT NULL,
            retrieved_at TIMESTAMP NOT NULL,
            UNIQUE (source_id, payload_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_records_external ON source_records(source_id, external_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_records_entity ON source_records(entity_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_field_provenance_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_provenance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(id),
            field_path TEXT NOT NULL,
            value_hash TEXT NOT NULL,
            source_record_id INTEGER NOT NULL REFERENCES source_records(id),
            trust_level INTEGER NOT NULL,
            confidence REAL NOT NULL,
            observed_at TIMESTAMP NOT NULL,
            applied INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_field_provenance_entity ON field_provenance(entity_id, field_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Review queue. The partial unique index is what makes two concurrent
/// resubmissions of one entity race safely.
async fn create_review_queue_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(id),
            original_payload TEXT NOT NULL,
            normalized_payload TEXT NOT NULL,
            warnings TEXT NOT NULL,
            dedup_key TEXT,
            source_key TEXT,
            payload_hash TEXT NOT NULL,
            effective_start TIMESTAMP,
            effective_end TIMESTAMP,
            status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected', 'superseded')),
            reviewed_by TEXT,
            reviewed_at TIMESTAMP,
            review_notes TEXT,
            rejection_reason TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_review_queue_one_pending
        ON review_queue(entity_id) WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_queue_dedup ON review_queue(dedup_key, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_queue_source ON review_queue(source_key, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_review_queue_expiry ON review_queue(status, effective_end)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_tombstones_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tombstones (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT,
            entity_uri TEXT NOT NULL,
            kind TEXT NOT NULL,
            deleted_at TIMESTAMP NOT NULL,
            reason TEXT NOT NULL,
            superseded_by TEXT,
            snapshot TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tombstones_uri ON tombstones(entity_uri)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Change feed. `sequence_number` is allocated by the writer inside the same
/// transaction as the mutation it records, so there is no AUTOINCREMENT.
async fn create_change_feed_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_feed (
            sequence_number INTEGER PRIMARY KEY,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('create', 'update', 'delete', 'merge')),
            changed_fields TEXT NOT NULL,
            snapshot TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_duplicate_candidates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS duplicate_candidates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL REFERENCES entities(id),
            candidate_id TEXT NOT NULL REFERENCES entities(id),
            kind TEXT NOT NULL,
            score REAL NOT NULL,
            layer TEXT NOT NULL CHECK (layer IN ('near_duplicate', 'similar_entity')),
            status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'dismissed', 'merged')),
            created_at TIMESTAMP NOT NULL,
            UNIQUE (entity_id, candidate_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_federation_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS federation_nodes (
            peer_id TEXT PRIMARY KEY,
            node_domain TEXT NOT NULL UNIQUE,
            base_url TEXT NOT NULL,
            trust_level INTEGER NOT NULL DEFAULT 5 CHECK (trust_level BETWEEN 1 AND 10),
            sync_enabled INTEGER NOT NULL DEFAULT 1,
            last_synced_cursor INTEGER NOT NULL DEFAULT 0,
            last_sync_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_idempotency (
            idempotency_key TEXT PRIMARY KEY,
            peer_id TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            result TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_idempotency_created ON sync_idempotency(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('available', 'running', 'completed', 'failed')),
            attempt INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            scheduled_at TIMESTAMP NOT NULL,
            attempted_at TIMESTAMP,
            finished_at TIMESTAMP,
            last_error TEXT,
            created_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs(status, scheduled_at)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_batch_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            item_count INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL,
            completed_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_items (
            batch_id TEXT NOT NULL REFERENCES batches(id),
            item_index INTEGER NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            entity_id TEXT,
            review_id INTEGER,
            message TEXT,
            details TEXT,
            updated_at TIMESTAMP NOT NULL,
            PRIMARY KEY (batch_id, item_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_lookup_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_cache (
            cache_key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
