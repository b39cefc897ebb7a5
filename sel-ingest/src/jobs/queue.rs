//! SQLite-backed job queue

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sel_common::{Error, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use super::{Job, JobRunner, JobStatus, JobType};
use crate::db::{parse_opt_ts, parse_ts, ts, Store};
use crate::utils::retry_on_lock;

/// `last_error` for a job whose worker disappeared mid-run
const ABANDONED_ERROR: &str = "worker stopped while the job was running";

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let payload: String = row.get("payload");
    Ok(Job {
        id: row.get("id"),
        job_type: row.get::<String, _>("job_type").parse()?,
        payload: serde_json::from_str(&payload)?,
        status: row.get::<String, _>("status").parse()?,
        attempt: row.get::<i64, _>("attempt") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        scheduled_at: parse_ts(row.get("scheduled_at"))?,
        attempted_at: parse_opt_ts(row.get("attempted_at"))?,
        finished_at: parse_opt_ts(row.get("finished_at"))?,
        last_error: row.get("last_error"),
        created_at: parse_ts(row.get("created_at"))?,
    })
}

/// What happened to a failed job
#[derive(Debug)]
pub enum FailureOutcome {
    /// Scheduled again after the backoff
    Retrying { next_attempt_at: DateTime<Utc> },
    /// Budget exhausted; the error describes the final state
    Permanent(Error),
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    store: Store,
}

impl SqliteJobQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Queue a job to run at `scheduled_at`
    pub async fn enqueue_at(
        &self,
        job_type: JobType,
        payload: Value,
        scheduled_at: DateTime<Utc>,
    ) -> Result<i64> {
        let payload = serde_json::to_string(&payload)?;
        retry_on_lock("job_enqueue", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("job_enqueue").await?;
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO jobs (job_type, payload, status, attempt, max_attempts, scheduled_at, created_at)
                VALUES (?, ?, 'available', 0, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(job_type.as_str())
            .bind(&payload)
            .bind(i64::from(job_type.max_attempts()))
            .bind(ts(&scheduled_at))
            .bind(ts(&now))
            .fetch_one(tx.conn())
            .await?;
            tx.commit().await?;

            debug!(job_id = id, job_type = job_type.as_str(), "Job enqueued");
            Ok(id)
        })
        .await
    }

    /// Claim the next due job, marking it running and counting the attempt
    pub async fn dequeue(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        retry_on_lock("job_dequeue", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("job_dequeue").await?;

            let id: Option<i64> = sqlx::query_scalar(
                r#"
                SELECT id FROM jobs
                WHERE status = 'available' AND scheduled_at <= ?
                ORDER BY scheduled_at, id
                LIMIT 1
                "#,
            )
            .bind(ts(&now))
            .fetch_optional(tx.conn())
            .await?;

            let Some(id) = id else {
                return Ok(None);
            };

            let row = sqlx::query(
                r#"
                UPDATE jobs SET status = 'running', attempt = attempt + 1, attempted_at = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(ts(&now))
            .bind(id)
            .fetch_one(tx.conn())
            .await?;
            let job = job_from_row(&row)?;
            tx.commit().await?;

            Ok(Some(job))
        })
        .await
    }

    pub async fn complete(&self, job_id: i64) -> Result<()> {
        retry_on_lock("job_complete", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("job_complete").await?;
            sqlx::query("UPDATE jobs SET status = 'completed', finished_at = ?, last_error = NULL WHERE id = ?")
                .bind(ts(&Utc::now()))
                .bind(job_id)
                .execute(tx.conn())
                .await?;
            tx.commit().await
        })
        .await
    }

    /// Record a failed attempt: reschedule with backoff, or mark the job
    /// permanently failed once its budget is spent.
    pub async fn fail(&self, job: &Job, message: &str, policy: &RetryPolicy) -> Result<FailureOutcome> {
        let now = Utc::now();
        let exhausted = job.attempt >= job.max_attempts;
        let next_attempt_at = now
            + Duration::from_std(policy.time_until_next_retry(job.attempt))
                .unwrap_or_else(|_| Duration::seconds(1));

        retry_on_lock("job_fail", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("job_fail").await?;
            if exhausted {
                sqlx::query("UPDATE jobs SET status = 'failed', finished_at = ?, last_error = ? WHERE id = ?")
                    .bind(ts(&now))
                    .bind(message)
                    .bind(job.id)
                    .execute(tx.conn())
                    .await?;
            } else {
                sqlx::query("UPDATE jobs SET status = 'available', scheduled_at = ?, last_error = ? WHERE id = ?")
                    .bind(ts(&next_attempt_at))
                    .bind(message)
                    .bind(job.id)
                    .execute(tx.conn())
                    .await?;
            }
            tx.commit().await
        })
        .await?;

        if exhausted {
            let err = Error::PermanentJobFailure {
                job_id: job.id,
                job_type: job.job_type.to_string(),
                attempts: job.attempt,
                last_error: message.to_string(),
            };
            error!(job_id = job.id, job_type = job.job_type.as_str(), error = %err, "Job failed permanently");
            Ok(FailureOutcome::Permanent(err))
        } else {
            warn!(
                job_id = job.id,
                job_type = job.job_type.as_str(),
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                error = message,
                "Job attempt failed, will retry"
            );
            Ok(FailureOutcome::Retrying { next_attempt_at })
        }
    }

    pub async fn get(&self, job_id: i64) -> Result<Job> {
        let mut conn = self.store.read().await?;
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref()
            .map(job_from_row)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Jobs waiting for an operator, most recent first
    pub async fn list_failed(&self) -> Result<Vec<Job>> {
        let mut conn = self.store.read().await?;
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'failed' ORDER BY finished_at DESC, id DESC")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Operator re-queue of a permanently failed job with a fresh budget
    pub async fn retry_failed(&self, job_id: i64) -> Result<Job> {
        retry_on_lock("job_retry_failed", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("job_retry_failed").await?;
            let row = sqlx::query(
                r#"
                UPDATE jobs SET status = 'available', attempt = 0, scheduled_at = ?, finished_at = NULL
                WHERE id = ? AND status = 'failed'
                RETURNING *
                "#,
            )
            .bind(ts(&now))
            .bind(job_id)
            .fetch_optional(tx.conn())
            .await?;

            let Some(row) = row else {
                return Err(Error::NotFound(format!("failed job {}", job_id)));
            };
            let job = job_from_row(&row)?;
            tx.commit().await?;

            info!(job_id, job_type = job.job_type.as_str(), "Failed job re-queued by operator");
            Ok(job)
        })
        .await
    }

    /// Return jobs stuck in `running` since before `cutoff` to the queue.
    /// Their attempt stays counted; jobs with no attempts left are marked
    /// failed instead.
    pub async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let (requeued, failed) = retry_on_lock("job_requeue_stale", self.store.max_lock_wait_ms(), || async {
            let now = ts(&Utc::now());
            let mut tx = self.store.begin_write("job_requeue_stale").await?;
            let failed = sqlx::query(
                r#"
                UPDATE jobs SET status = 'failed', finished_at = ?, last_error = ?
                WHERE status = 'running' AND attempted_at < ? AND attempt >= max_attempts
                "#,
            )
            .bind(&now)
            .bind(ABANDONED_ERROR)
            .bind(ts(&cutoff))
            .execute(tx.conn())
            .await?;
            let requeued = sqlx::query(
                r#"
                UPDATE jobs SET status = 'available', scheduled_at = ?
                WHERE status = 'running' AND attempted_at < ? AND attempt < max_attempts
                "#,
            )
            .bind(&now)
            .bind(ts(&cutoff))
            .execute(tx.conn())
            .await?;
            tx.commit().await?;
            Ok((requeued.rows_affected(), failed.rows_affected()))
        })
        .await?;

        if requeued > 0 {
            warn!(requeued, "Re-queued jobs abandoned while running");
        }
        if failed > 0 {
            error!(failed, "Abandoned jobs had no attempts left and were marked failed");
        }
        Ok(requeued)
    }
}

#[async_trait]
impl JobRunner for SqliteJobQueue {
    async fn enqueue(&self, job_type: JobType, payload: Value) -> Result<i64> {
        self.enqueue_at(job_type, payload, Utc::now()).await
    }
}
