//! Background job runner
//!
//! Enrichment and maintenance work runs on a worker pool separate from
//! request handling. Delivery is at-least-once: handlers must be idempotent
//! by the entity they act on, never by job state.

pub mod handlers;
pub mod queue;
pub mod retry;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use handlers::{
    BatchIngestionHandler, GeocodeHandler, IdempotencyCleanupHandler, LookupCacheCleanupHandler, ReviewExpiryHandler,
};
pub use queue::SqliteJobQueue;
pub use retry::RetryPolicy;
pub use worker::{spawn_scheduler, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    GeocodePlace,
    BatchIngestion,
    ReviewExpirySweep,
    IdempotencyCleanup,
    LookupCacheCleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::GeocodePlace => "geocode_place",
            JobType::BatchIngestion => "batch_ingestion",
            JobType::ReviewExpirySweep => "review_expiry_sweep",
            JobType::IdempotencyCleanup => "idempotency_cleanup",
            JobType::LookupCacheCleanup => "lookup_cache_cleanup",
        }
    }

    /// Attempts before the job is marked permanently failed
    pub fn max_attempts(&self) -> u32 {
        match self {
            JobType::GeocodePlace | JobType::BatchIngestion => 3,
            // Sweeps run again on the next schedule tick anyway
            JobType::ReviewExpirySweep | JobType::IdempotencyCleanup | JobType::LookupCacheCleanup => 1,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "geocode_place" => Ok(JobType::GeocodePlace),
            "batch_ingestion" => Ok(JobType::BatchIngestion),
            "review_expiry_sweep" => Ok(JobType::ReviewExpirySweep),
            "idempotency_cleanup" => Ok(JobType::IdempotencyCleanup),
            "lookup_cache_cleanup" => Ok(JobType::LookupCacheCleanup),
            other => Err(Error::Internal(format!("unknown job type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Available,
    Running,
    Completed,
    /// Retry budget exhausted; waits for an operator
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Available => "available",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(JobStatus::Available),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Internal(format!("unknown job status '{}'", other))),
        }
    }
}

/// A queued unit of background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub payload: Value,
    pub status: JobStatus,
    /// Attempts started so far, including the current one while running
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The enqueue side of the runner, injected into the ingest pipeline
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Queue a job and return its id
    async fn enqueue(&self, job_type: JobType, payload: Value) -> Result<i64>;
}

/// Executes one job type
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn handle(&self, job: &Job) -> Result<()>;
}
