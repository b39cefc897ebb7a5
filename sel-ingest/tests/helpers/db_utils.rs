//! Database Test Utilities

use sel_common::config::ServiceConfig;
use sel_ingest::db::Store;
use sel_ingest::AppState;
use tempfile::TempDir;

pub const BASE_URL: &str = "https://sel.test";

/// Compiled defaults with a fixed public URL and fast job retries
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig {
        base_url: BASE_URL.to_string(),
        ..Default::default()
    };
    config.jobs.retry_initial_ms = 0;
    config.jobs.retry_max_ms = 0;
    config
}

/// Every service over a fresh in-memory database
pub async fn create_test_state() -> AppState {
    create_test_state_with(test_config()).await
}

pub async fn create_test_state_with(config: ServiceConfig) -> AppState {
    let pool = sel_common::db::init_memory_database()
        .await
        .expect("Failed to create in-memory database");
    AppState::new(Store::new(pool, config.storage.max_lock_wait_ms), &config)
}

/// Every service over a file-backed database with a multi-connection pool
///
/// Returns (TempDir, AppState) - TempDir must be kept alive for duration of test
pub async fn create_file_state() -> (TempDir, AppState) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("sel-test.db");
    let config = test_config();

    let pool = sel_common::db::init_database(&db_path)
        .await
        .expect("Failed to create database");
    let state = AppState::new(Store::new(pool, config.storage.max_lock_wait_ms), &config);
    (temp_dir, state)
}

/// `SELECT COUNT(*)` over a table, optionally filtered
pub async fn count_rows(state: &AppState, table: &str, filter: &str) -> i64 {
    let sql = if filter.is_empty() {
        format!("SELECT COUNT(*) FROM {}", table)
    } else {
        format!("SELECT COUNT(*) FROM {} WHERE {}", table, filter)
    };
    let mut conn = state.store.read().await.unwrap();
    sqlx::query_scalar(&sql).fetch_one(&mut *conn).await.unwrap()
}
