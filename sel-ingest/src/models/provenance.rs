//! Source records and per-field provenance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Trust assigned to producers that do not state one
pub const DEFAULT_TRUST: u8 = 5;

/// Clamp to the 1..=10 trust scale (higher is more trusted)
pub fn clamp_trust(level: u8) -> u8 {
    level.clamp(1, 10)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    Api,
    Federation,
    Scraper,
    Admin,
}

impl ProducerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerKind::Api => "api",
            ProducerKind::Federation => "federation",
            ProducerKind::Scraper => "scraper",
            ProducerKind::Admin => "admin",
        }
    }
}

impl std::str::FromStr for ProducerKind {
    type Err = sel_common::Error;

    fn from_str(s: &str) -> sel_common::Result<Self> {
        match s {
            "api" => Ok(ProducerKind::Api),
            "federation" => Ok(ProducerKind::Federation),
            "scraper" => Ok(ProducerKind::Scraper),
            "admin" => Ok(ProducerKind::Admin),
            other => Err(sel_common::Error::Internal(format!("unknown producer '{}'", other))),
        }
    }
}

fn default_trust() -> u8 {
    DEFAULT_TRUST
}

fn default_producer() -> ProducerKind {
    ProducerKind::Api
}

/// Who submitted a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub source_id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default = "default_producer")]
    pub producer: ProducerKind,
    #[serde(default = "default_trust")]
    pub trust_level: u8,
}

impl SourceMeta {
    pub fn new(source_id: impl Into<String>, trust_level: u8) -> Self {
        Self {
            source_id: source_id.into(),
            external_id: None,
            producer: ProducerKind::Api,
            trust_level: clamp_trust(trust_level),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_producer(mut self, producer: ProducerKind) -> Self {
        self.producer = producer;
        self
    }

    /// Key identifying this producer's record of the thing, if it has one
    pub fn source_key(&self) -> Option<String> {
        self.external_id
            .as_ref()
            .map(|ext| format!("{}:{}", self.source_id, ext))
    }
}

/// One producer's as-submitted payload. The payload is immutable; only the
/// retrieval time is refreshed on identical resubmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: i64,
    pub entity_id: Uuid,
    pub source_id: String,
    pub external_id: Option<String>,
    pub producer: ProducerKind,
    pub payload: Value,
    pub payload_hash: String,
    pub trust_level: u8,
    pub first_seen_at: DateTime<Utc>,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub id: i64,
    pub entity_id: Uuid,
    pub field_path: String,
    pub value_hash: String,
    pub source_record_id: i64,
    pub trust_level: u8,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    /// Whether this observation is the value the canonical entity holds
    pub applied: bool,
}
