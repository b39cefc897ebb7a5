//! Instrumented write transactions
//!
//! Wraps a SQLite transaction together with the store's write gate and logs
//! how long the caller waited for it and how long it was held.

use sel_common::Result;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A write transaction that holds the write gate until commit, rollback or drop
pub struct MonitoredTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
    _gate: OwnedMutexGuard<()>,
    caller: &'static str,
    acquired_at: Instant,
}

impl MonitoredTransaction {
    /// Commit and release the gate
    pub async fn commit(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        let tx = self.tx.take().expect("Transaction already consumed");

        tx.commit().await?;

        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                "Long write transaction; other writers were blocked"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, "Write transaction committed");
        }

        Ok(())
    }

    /// Roll back and release the gate
    pub async fn rollback(mut self) -> Result<()> {
        let held_ms = self.acquired_at.elapsed().as_millis();
        let tx = self.tx.take().expect("Transaction already consumed");

        tx.rollback().await?;
        tracing::debug!(caller = self.caller, held_ms, "Write transaction rolled back");

        Ok(())
    }

    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut **self.tx.as_mut().expect("Transaction already consumed")
    }
}

impl Drop for MonitoredTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx rolls the transaction back when it is dropped
            tracing::debug!(
                caller = self.caller,
                held_ms = self.acquired_at.elapsed().as_millis(),
                "Write transaction dropped without commit (rolled back)"
            );
        }
    }
}

/// Take the write gate, then begin a transaction
pub async fn begin_monitored(
    pool: &SqlitePool,
    gate: &Arc<Mutex<()>>,
    caller: &'static str,
) -> Result<MonitoredTransaction> {
    let start = Instant::now();

    let guard = gate.clone().lock_owned().await;
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow write gate acquisition; writers are queueing");
    } else {
        tracing::debug!(caller, wait_ms, "Write transaction begun");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        _gate: guard,
        caller,
        acquired_at: Instant::now(),
    })
}
