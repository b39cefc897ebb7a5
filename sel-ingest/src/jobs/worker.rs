//! Worker pool and sweep scheduler

use chrono::Utc;
use sel_common::config::JobsConfig;
use sel_common::Result;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{FailureOutcome, SqliteJobQueue};
use super::retry::RetryPolicy;
use super::{Job, JobHandler, JobRunner, JobType};

/// Result of processing a single job
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Retrying,
    PermanentlyFailed,
}

/// Polls the queue and runs handlers with a per-job timeout
pub struct WorkerPool {
    queue: Arc<SqliteJobQueue>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    retry_policy: RetryPolicy,
    workers: usize,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl WorkerPool {
    pub fn new(queue: Arc<SqliteJobQueue>, config: &JobsConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            retry_policy: RetryPolicy::from_config(config),
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.job_type(), handler);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Dequeue and process one due job, if any
    pub async fn run_once(&self) -> Result<Option<(Job, JobOutcome)>> {
        let Some(job) = self.queue.dequeue(Utc::now()).await? else {
            return Ok(None);
        };
        let outcome = self.process(&job).await?;
        Ok(Some((job, outcome)))
    }

    async fn process(&self, job: &Job) -> Result<JobOutcome> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            let msg = format!("no handler registered for {}", job.job_type);
            return self.record_failure(job, &msg).await;
        };

        debug!(job_id = job.id, job_type = job.job_type.as_str(), attempt = job.attempt, "Running job");

        match tokio::time::timeout(self.job_timeout, handler.handle(job)).await {
            Ok(Ok(())) => {
                self.queue.complete(job.id).await?;
                debug!(job_id = job.id, job_type = job.job_type.as_str(), "Job completed");
                Ok(JobOutcome::Completed)
            }
            Ok(Err(e)) => self.record_failure(job, &e.to_string()).await,
            Err(_) => {
                let msg = format!("timed out after {}s", self.job_timeout.as_secs());
                self.record_failure(job, &msg).await
            }
        }
    }

    async fn record_failure(&self, job: &Job, message: &str) -> Result<JobOutcome> {
        match self.queue.fail(job, message, &self.retry_policy).await? {
            FailureOutcome::Retrying { .. } => Ok(JobOutcome::Retrying),
            FailureOutcome::Permanent(_) => Ok(JobOutcome::PermanentlyFailed),
        }
    }

    /// Start the workers. They stop between jobs once `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, "Starting job workers");
        (0..self.workers)
            .map(|worker_id| {
                let pool = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.worker_loop(worker_id, cancel).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker_id, "Job worker stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            // Drain everything due before waiting again
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match self.run_once().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        error!(worker_id, error = %e, "Job worker failed to poll queue");
                        break;
                    }
                }
            }
        }
    }
}

/// Periodically enqueue the maintenance sweeps and recover abandoned jobs
pub fn spawn_scheduler(
    queue: Arc<SqliteJobQueue>,
    config: &JobsConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs.max(1));
    let stale_after = chrono::Duration::seconds(config.job_timeout_secs as i64 * 2);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Job scheduler stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            for job_type in [
                JobType::ReviewExpirySweep,
                JobType::IdempotencyCleanup,
                JobType::LookupCacheCleanup,
            ] {
                if let Err(e) = queue.enqueue(job_type, json!({})).await {
                    warn!(job_type = job_type.as_str(), error = %e, "Failed to schedule sweep");
                }
            }
            if let Err(e) = queue.requeue_stale(Utc::now() - stale_after).await {
                warn!(error = %e, "Failed to re-queue abandoned jobs");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use async_trait::async_trait;
    use sel_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        fn job_type(&self) -> JobType {
            JobType::GeocodePlace
        }

        async fn handle(&self, _job: &Job) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(())
            } else {
                Err(Error::Internal(format!("attempt {} failed", n)))
            }
        }
    }

    async fn pool(succeed_on: u32) -> (WorkerPool, Arc<Flaky>) {
        let db = sel_common::db::init_memory_database().await.unwrap();
        let queue = Arc::new(SqliteJobQueue::new(Store::new(db, 1000)));
        let handler = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on,
        });
        let pool = WorkerPool::new(queue, &JobsConfig::default())
            .with_handler(handler.clone())
            .with_retry_policy(RetryPolicy::new(1, Duration::ZERO, Duration::ZERO));
        (pool, handler)
    }

    #[tokio::test]
    async fn retries_until_handler_succeeds() {
        let (pool, handler) = pool(2).await;
        pool.queue.enqueue(JobType::GeocodePlace, json!({})).await.unwrap();

        let (_, first) = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(first, JobOutcome::Retrying));
        let (job, second) = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(second, JobOutcome::Completed));
        assert_eq!(job.attempt, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(pool.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unhandled_job_type_fails_permanently() {
        let (pool, _) = pool(1).await;
        let id = pool.queue.enqueue(JobType::IdempotencyCleanup, json!({})).await.unwrap();

        let (_, outcome) = pool.run_once().await.unwrap().unwrap();
        assert!(matches!(outcome, JobOutcome::PermanentlyFailed));
        let failed = pool.queue.list_failed().await.unwrap();
        assert_eq!(failed[0].id, id);
    }
}
