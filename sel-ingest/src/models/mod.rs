//! Data models for the ingest service

pub mod batch;
pub mod entity;
pub mod federation;
pub mod feed;
pub mod outcome;
pub mod payload;
pub mod provenance;
pub mod review;

pub use batch::{BatchItemResult, BatchItemStatus, BatchStatus};
pub use entity::{CanonicalEntity, EntityKind, LifecycleState};
pub use federation::{FederationNode, PeerChange, SyncItemResult, SyncOutcome, SyncResult};
pub use feed::{ChangeAction, ChangeEntry, Tombstone};
pub use outcome::{Disposition, IngestOutcome, IngestStatus};
pub use payload::{
    DateRange, EventDraft, EventInput, OccurrenceInput, OrganizationInput, PlaceInput, Schedule,
    VirtualLocationInput,
};
pub use provenance::{FieldProvenance, ProducerKind, SourceMeta, SourceRecord};
pub use review::{
    codes, requires_review, warning_codes, Confidence, ReviewAction, ReviewEntry, ReviewStatus,
    Warning,
};
