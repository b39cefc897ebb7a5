//! Batch ingestion
//!
//! A batch is stored and acknowledged at once; its items are ingested later
//! by the `batch_ingestion` job, each in its own transaction. A failing item
//! is recorded as such and never affects its siblings.

use chrono::Utc;
use sel_common::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::coordinator::IngestCoordinator;
use crate::db::{batches, Store};
use crate::jobs::{JobRunner, JobType};
use crate::models::{BatchItemResult, BatchItemStatus, BatchStatus, IngestOutcome, IngestStatus, SourceMeta};
use crate::utils::retry_on_lock;

pub const MAX_BATCH_ITEMS: usize = 1000;

/// Per-item result for a finished ingest attempt, or `None` when the error
/// is transient and the item should stay pending for the next job attempt.
pub fn item_result(index: i64, result: Result<IngestOutcome>) -> Option<BatchItemResult> {
    let item = match result {
        Ok(outcome) => BatchItemResult {
            index,
            status: match outcome.status {
                IngestStatus::Published => BatchItemStatus::Published,
                IngestStatus::Queued => BatchItemStatus::Queued,
            },
            entity_id: Some(outcome.entity_id),
            review_id: outcome.review_id,
            message: None,
            details: (!outcome.warnings.is_empty()).then(|| json!({ "warnings": outcome.warnings })),
        },
        Err(Error::PreviouslyRejected {
            review_id,
            reason,
            reviewed_by,
            reviewed_at,
        }) => BatchItemResult {
            index,
            status: BatchItemStatus::Rejected,
            entity_id: None,
            review_id: Some(review_id),
            message: Some(format!("previously rejected: {}", reason)),
            details: Some(json!({
                "reason": reason,
                "reviewedBy": reviewed_by,
                "reviewedAt": reviewed_at,
            })),
        },
        Err(Error::Validation(errors)) => BatchItemResult {
            index,
            status: BatchItemStatus::Failed,
            entity_id: None,
            review_id: None,
            message: Some("validation failed".to_string()),
            details: Some(json!({ "errors": errors })),
        },
        Err(e) if e.is_transient() => return None,
        Err(e) => BatchItemResult {
            index,
            status: BatchItemStatus::Failed,
            entity_id: None,
            review_id: None,
            message: Some(e.to_string()),
            details: None,
        },
    };
    Some(item)
}

pub struct BatchIngestor {
    store: Store,
    coordinator: Arc<IngestCoordinator>,
    jobs: Arc<dyn JobRunner>,
}

impl BatchIngestor {
    pub fn new(store: Store, coordinator: Arc<IngestCoordinator>, jobs: Arc<dyn JobRunner>) -> Self {
        Self {
            store,
            coordinator,
            jobs,
        }
    }

    /// Store the batch and schedule its processing; returns the batch id
    pub async fn submit(&self, items: Vec<Value>, source: SourceMeta) -> Result<Uuid> {
        if items.is_empty() {
            return Err(Error::validation("items", "must contain at least one event"));
        }
        if items.len() > MAX_BATCH_ITEMS {
            return Err(Error::validation(
                "items",
                format!("at most {} events per batch", MAX_BATCH_ITEMS),
            ));
        }

        let batch_id = Uuid::new_v4();
        retry_on_lock("batch_submit", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("batch_submit").await?;
            batches::create_batch(tx.conn(), batch_id, &source, &items, Utc::now()).await?;
            tx.commit().await
        })
        .await?;

        self.jobs
            .enqueue(JobType::BatchIngestion, json!({ "batch_id": batch_id }))
            .await?;

        info!(batch_id = %batch_id, items = items.len(), source_id = %source.source_id, "Batch accepted");
        Ok(batch_id)
    }

    /// Ingest every still-pending item of a batch.
    ///
    /// Safe to run again after a crash: finished items are skipped. A
    /// transient storage failure stops the run with the item still pending
    /// so the job retry resumes from it.
    pub async fn process(&self, batch_id: Uuid) -> Result<usize> {
        let (batch, pending) = {
            let mut conn = self.store.read().await?;
            let batch = batches::get_batch(&mut conn, batch_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;
            let pending = batches::pending_items(&mut conn, batch_id).await?;
            (batch, pending)
        };

        let mut processed = 0;
        for item in pending {
            let result = self.coordinator.ingest(&item.payload, &batch.source).await;
            let Some(item_result) = item_result(item.index, result) else {
                warn!(batch_id = %batch_id, index = item.index, "Transient failure, batch will resume later");
                return Err(Error::TransientStorage(format!(
                    "batch {} paused at item {}",
                    batch_id, item.index
                )));
            };

            retry_on_lock("batch_record_item", self.store.max_lock_wait_ms(), || async {
                let mut tx = self.store.begin_write("batch_record_item").await?;
                batches::record_item(tx.conn(), batch_id, &item_result, Utc::now()).await?;
                tx.commit().await
            })
            .await?;
            processed += 1;
        }

        retry_on_lock("batch_complete", self.store.max_lock_wait_ms(), || async {
            let mut tx = self.store.begin_write("batch_complete").await?;
            batches::mark_complete(tx.conn(), batch_id, Utc::now()).await?;
            tx.commit().await
        })
        .await?;

        info!(batch_id = %batch_id, processed, "Batch processed");
        Ok(processed)
    }

    pub async fn status(&self, batch_id: Uuid) -> Result<BatchStatus> {
        let mut conn = self.store.read().await?;
        batches::batch_status(&mut conn, batch_id).await
    }
}
