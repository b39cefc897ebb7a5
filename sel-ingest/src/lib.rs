//! sel-ingest library interface
//!
//! Exposes the pipeline services and the HTTP router for the binary and for
//! integration tests.

pub mod api;
pub mod cache;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sel_common::config::ServiceConfig;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::cache::LookupCache;
use crate::db::Store;
use crate::jobs::{
    BatchIngestionHandler, GeocodeHandler, IdempotencyCleanupHandler, LookupCacheCleanupHandler,
    ReviewExpiryHandler, SqliteJobQueue, WorkerPool,
};
use crate::services::{
    BatchIngestor, ChangeFeed, DedupEngine, FederationSync, Geocoder, IngestCoordinator,
    ReviewQueue, TrustThresholdPolicy, Validator,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub coordinator: Arc<IngestCoordinator>,
    pub batches: Arc<BatchIngestor>,
    pub review: Arc<ReviewQueue>,
    pub dedup: Arc<DedupEngine>,
    pub changes: ChangeFeed,
    pub federation: Arc<FederationSync>,
    pub jobs: Arc<SqliteJobQueue>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every service over one store
    pub fn new(store: Store, config: &ServiceConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let validator = Validator::new(config.review.max_future_days);

        let jobs = Arc::new(SqliteJobQueue::new(store.clone()));
        let dedup = Arc::new(DedupEngine::new(config.dedup.clone(), base_url.clone()));
        let review = Arc::new(ReviewQueue::new(
            store.clone(),
            validator.clone(),
            base_url.clone(),
            Arc::new(TrustThresholdPolicy::new(config.review.auto_approve_min_trust)),
        ));
        let coordinator = Arc::new(IngestCoordinator::new(
            store.clone(),
            validator,
            dedup.clone(),
            review.clone(),
            jobs.clone(),
            base_url.clone(),
        ));
        let batches = Arc::new(BatchIngestor::new(store.clone(), coordinator.clone(), jobs.clone()));
        let federation = Arc::new(FederationSync::new(
            store.clone(),
            base_url,
            config.federation.idempotency_retention_hours,
        ));

        Self {
            changes: ChangeFeed::new(store.clone()),
            store,
            coordinator,
            batches,
            review,
            dedup,
            federation,
            jobs,
            startup_time: Utc::now(),
        }
    }

    /// Worker pool with a handler for every job type. Geocoding jobs only get
    /// a handler when a geocoder is configured; without one they fail and
    /// wait for an operator.
    pub fn worker_pool(
        &self,
        config: &ServiceConfig,
        geocoder: Option<Arc<dyn Geocoder>>,
        cache: Arc<dyn LookupCache>,
    ) -> WorkerPool {
        let mut pool = WorkerPool::new(self.jobs.clone(), &config.jobs)
            .with_handler(Arc::new(BatchIngestionHandler::new(self.batches.clone())))
            .with_handler(Arc::new(ReviewExpiryHandler::new(self.review.clone())))
            .with_handler(Arc::new(IdempotencyCleanupHandler::new(self.federation.clone())))
            .with_handler(Arc::new(LookupCacheCleanupHandler::new(cache.clone())));

        if let Some(geocoder) = geocoder {
            pool = pool.with_handler(Arc::new(GeocodeHandler::new(
                self.store.clone(),
                geocoder,
                cache,
                config.base_url.trim_end_matches('/'),
            )));
        }
        pool
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::ingest_routes())
        .merge(api::review_routes())
        .merge(api::admin_routes())
        .merge(api::change_routes())
        .merge(api::federation_routes())
        .merge(api::job_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
