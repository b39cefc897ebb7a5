//! Service layer
//!
//! Each service owns one stage of the pipeline and talks to storage through
//! [`crate::db::Store`]. `IngestCoordinator` wires the stages together for a
//! single submission.

pub mod batch;
pub mod change_feed;
pub mod coordinator;
pub mod dedup;
pub mod federation;
pub mod geocoding;
pub mod normalizer;
pub mod review_queue;
pub mod similarity;
pub mod validator;

pub use batch::BatchIngestor;
pub use change_feed::{ChangeFeed, ChangePage};
pub use coordinator::IngestCoordinator;
pub use dedup::{DedupEngine, MergeOutcome};
pub use federation::FederationSync;
pub use geocoding::{Geocoder, NominatimGeocoder};
pub use review_queue::{ApprovalPolicy, FixOutcome, ReviewQueue, TrustThresholdPolicy};
pub use validator::Validator;
