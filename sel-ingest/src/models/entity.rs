//! Canonical entities and their lifecycle

use chrono::{DateTime, Utc};
use sel_common::linked_data;
use sel_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payload::object_fields;
use super::{EventDraft, OrganizationInput, PlaceInput};

/// Kind of real-world thing a canonical entity describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Place,
    Organization,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Place => "place",
            EntityKind::Organization => "organization",
        }
    }

    /// Linked-data `@type`
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Event => "Event",
            EntityKind::Place => "Place",
            EntityKind::Organization => "Organization",
        }
    }

    /// Path segment used in entity URIs
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Event => "events",
            EntityKind::Place => "places",
            EntityKind::Organization => "organizations",
        }
    }

    pub fn from_type_name(type_name: &str) -> Option<Self> {
        match type_name {
            "Event" => Some(EntityKind::Event),
            "Place" => Some(EntityKind::Place),
            "Organization" => Some(EntityKind::Organization),
            _ => None,
        }
    }

    pub fn from_collection(collection: &str) -> Option<Self> {
        match collection {
            "events" => Some(EntityKind::Event),
            "places" => Some(EntityKind::Place),
            "organizations" => Some(EntityKind::Organization),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "event" => Ok(EntityKind::Event),
            "place" => Ok(EntityKind::Place),
            "organization" => Ok(EntityKind::Organization),
            other => Err(Error::Internal(format!("unknown entity kind '{}'", other))),
        }
    }
}

/// Entity lifecycle.
///
/// `PendingReview` holds exactly while an open review queue entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Draft,
    PendingReview,
    Published,
    Deleted,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::PendingReview => "pending_review",
            LifecycleState::Published => "published",
            LifecycleState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(LifecycleState::Draft),
            "pending_review" => Ok(LifecycleState::PendingReview),
            "published" => Ok(LifecycleState::Published),
            "deleted" => Ok(LifecycleState::Deleted),
            other => Err(Error::Internal(format!("unknown lifecycle state '{}'", other))),
        }
    }
}

/// The single authoritative record for a real-world event, place or organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub lifecycle_state: LifecycleState,
    pub name: String,
    /// Normalized payload; the source of truth for every projected column
    pub fields: Map<String, Value>,
    /// Canonical hash of `fields`
    pub payload_hash: String,
    pub dedup_key: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub venue_id: Option<Uuid>,
    pub organizer_id: Option<Uuid>,
    pub locality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Origin URI for entities replicated from a peer; `None` when owned here
    pub federation_uri: Option<String>,
    pub origin_peer: Option<String>,
    /// Highest peer sequence number applied to this entity
    pub remote_sequence: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// Fresh entity with a new id and both timestamps set to `now`
    pub fn new(kind: EntityKind, name: String, fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        let payload_hash = linked_data::fingerprint(&Value::Object(fields.clone()));
        Self {
            id: Uuid::new_v4(),
            kind,
            lifecycle_state: LifecycleState::Draft,
            name,
            fields,
            payload_hash,
            dedup_key: None,
            start_time: None,
            end_time: None,
            venue_id: None,
            organizer_id: None,
            locality: None,
            latitude: None,
            longitude: None,
            federation_uri: None,
            origin_peer: None,
            remote_sequence: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the payload and keep `payload_hash` in step with it
    pub fn set_fields(&mut self, fields: Map<String, Value>) {
        self.payload_hash = linked_data::fingerprint(&Value::Object(fields.clone()));
        self.fields = fields;
    }

    pub fn is_locally_owned(&self) -> bool {
        self.federation_uri.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle_state == LifecycleState::Deleted
    }

    /// Take payload and every projected column from a normalized event draft
    pub fn set_event(&mut self, draft: &EventDraft) -> Result<()> {
        self.name = draft.name.clone();
        self.set_fields(draft.to_fields()?);
        let start = draft.schedule.effective_start();
        self.start_time = Some(start);
        self.end_time = Some(draft.schedule.effective_end());
        self.dedup_key = Some(linked_data::dedup_key(&draft.name, draft.venue_name(), &start));
        self.locality = draft
            .location
            .as_ref()
            .and_then(|p| p.address_locality.clone());
        Ok(())
    }

    /// Take payload and projected columns from a normalized place
    pub fn set_place(&mut self, place: &PlaceInput) -> Result<()> {
        self.name = place.name.clone();
        self.set_fields(object_fields(place)?);
        self.locality = place.address_locality.clone();
        if place.latitude.is_some() && place.longitude.is_some() {
            self.latitude = place.latitude;
            self.longitude = place.longitude;
        }
        Ok(())
    }

    /// Take payload from a normalized organization
    pub fn set_organization(&mut self, org: &OrganizationInput) -> Result<()> {
        self.name = org.name.clone();
        self.set_fields(object_fields(org)?);
        Ok(())
    }

    /// Identity on the wire: the origin URI for replicated entities, else a local URI
    pub fn uri(&self, base_url: &str) -> String {
        match &self.federation_uri {
            Some(uri) => uri.clone(),
            None => linked_data::entity_uri(base_url, self.kind.collection(), &self.id.to_string()),
        }
    }

    /// Framed snapshot used by the change feed
    pub fn to_linked_data(&self, base_url: &str) -> Value {
        let mut fields = self.fields.clone();
        fields.insert(
            "lifecycleState".to_string(),
            Value::String(self.lifecycle_state.as_str().to_string()),
        );
        linked_data::frame(self.kind.type_name(), &self.uri(base_url), &fields)
    }
}
