//! Job handlers

use async_trait::async_trait;
use chrono::Utc;
use sel_common::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Job, JobHandler, JobType};
use crate::cache::LookupCache;
use crate::db::{changes, entities, Store};
use crate::models::{ChangeAction, EntityKind, PlaceInput};
use crate::services::batch::BatchIngestor;
use crate::services::dedup::reproject;
use crate::services::federation::FederationSync;
use crate::services::geocoding::{Coordinates, Geocoder};
use crate::services::review_queue::ReviewQueue;
use crate::utils::retry_on_lock;

fn payload_uuid(job: &Job, key: &str) -> Result<Uuid> {
    job.payload
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| Error::InvalidInput(format!("{} job {} has no valid '{}'", job.job_type, job.id, key)))
}

/// Fills in coordinates for a place from its address
pub struct GeocodeHandler {
    store: Store,
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<dyn LookupCache>,
    base_url: String,
}

impl GeocodeHandler {
    pub fn new(
        store: Store,
        geocoder: Arc<dyn Geocoder>,
        cache: Arc<dyn LookupCache>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            geocoder,
            cache,
            base_url: base_url.into(),
        }
    }

    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>> {
        let key = format!("geocode:{}", address.to_lowercase());
        if let Some(cached) = self.cache.get(&key).await? {
            debug!(address, "Geocode cache hit");
            return Ok(serde_json::from_value(cached)?);
        }

        let found = self.geocoder.geocode(address).await?;
        // Misses are cached too, as null
        self.cache.put(&key, serde_json::to_value(found)?, None).await?;
        Ok(found)
    }
}

#[async_trait]
impl JobHandler for GeocodeHandler {
    fn job_type(&self) -> JobType {
        JobType::GeocodePlace
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        let place_id = payload_uuid(job, "place_id")?;

        let place = {
            let mut conn = self.store.read().await?;
            entities::get_entity(&mut conn, place_id).await?
        };
        let Some(place) = place else {
            debug!(place_id = %place_id, "Place gone, nothing to geocode");
            return Ok(());
        };
        if place.kind != EntityKind::Place || place.is_deleted() || place.latitude.is_some() {
            return Ok(());
        }

        let input: PlaceInput = serde_json::from_value(Value::Object(place.fields.clone()))?;
        let address = input.address_line();
        if address.is_empty() {
            return Ok(());
        }

        let Some(coordinates) = self.lookup(&address).await? else {
            info!(place_id = %place_id, address = %address, "Address not found by geocoder");
            return Ok(());
        };

        retry_on_lock("geocode_apply", self.store.max_lock_wait_ms(), || async {
            let now = Utc::now();
            let mut tx = self.store.begin_write("geocode_apply").await?;
            let mut place = entities::require_entity(tx.conn(), place_id).await?;
            // Someone else filled them in meanwhile
            if place.is_deleted() || place.latitude.is_some() {
                return Ok(());
            }

            let mut fields = place.fields.clone();
            fields.insert("latitude".to_string(), json!(coordinates.latitude));
            fields.insert("longitude".to_string(), json!(coordinates.longitude));
            reproject(&mut place, fields)?;
            place.updated_at = now;
            entities::update_entity(tx.conn(), &place).await?;

            let changed = ["latitude".to_string(), "longitude".to_string()];
            changes::append_change(tx.conn(), &place, ChangeAction::Update, &changed, None, &self.base_url, now)
                .await?;
            tx.commit().await
        })
        .await?;

        info!(
            place_id = %place_id,
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "Place geocoded"
        );
        Ok(())
    }
}

pub struct BatchIngestionHandler {
    ingestor: Arc<BatchIngestor>,
}

impl BatchIngestionHandler {
    pub fn new(ingestor: Arc<BatchIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl JobHandler for BatchIngestionHandler {
    fn job_type(&self) -> JobType {
        JobType::BatchIngestion
    }

    async fn handle(&self, job: &Job) -> Result<()> {
        let batch_id = payload_uuid(job, "batch_id")?;
        self.ingestor.process(batch_id).await.map(|_| ())
    }
}

pub struct ReviewExpiryHandler {
    queue: Arc<ReviewQueue>,
}

impl ReviewExpiryHandler {
    pub fn new(queue: Arc<ReviewQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl JobHandler for ReviewExpiryHandler {
    fn job_type(&self) -> JobType {
        JobType::ReviewExpirySweep
    }

    async fn handle(&self, _job: &Job) -> Result<()> {
        self.queue.expire(Utc::now()).await.map(|_| ())
    }
}

pub struct IdempotencyCleanupHandler {
    federation: Arc<FederationSync>,
}

impl IdempotencyCleanupHandler {
    pub fn new(federation: Arc<FederationSync>) -> Self {
        Self { federation }
    }
}

#[async_trait]
impl JobHandler for IdempotencyCleanupHandler {
    fn job_type(&self) -> JobType {
        JobType::IdempotencyCleanup
    }

    async fn handle(&self, _job: &Job) -> Result<()> {
        self.federation.cleanup(Utc::now()).await.map(|_| ())
    }
}

pub struct LookupCacheCleanupHandler {
    cache: Arc<dyn LookupCache>,
}

impl LookupCacheCleanupHandler {
    pub fn new(cache: Arc<dyn LookupCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl JobHandler for LookupCacheCleanupHandler {
    fn job_type(&self) -> JobType {
        JobType::LookupCacheCleanup
    }

    async fn handle(&self, _job: &Job) -> Result<()> {
        let purged = self.cache.purge_expired().await?;
        if purged > 0 {
            info!(purged, "Purged expired lookup cache entries");
        }
        Ok(())
    }
}
