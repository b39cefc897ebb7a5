//! HTTP API handlers for sel-ingest
//!
//! Thin request/response mapping over the services in `AppState`.
//! Authentication happens in front of this service.

pub mod admin;
pub mod changes;
pub mod federation;
pub mod health;
pub mod ingest;
pub mod jobs;
pub mod review;

pub use admin::admin_routes;
pub use changes::change_routes;
pub use federation::federation_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use jobs::job_routes;
pub use review::review_routes;
