//! Configuration loading
//!
//! Resolution priority for the config file:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config dir>/sel/<service>.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is not an error: the service logs a warning and starts with
//! defaults. A file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SEL_CONFIG";

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// HTTP listen address
    pub bind_address: String,
    /// Public URI prefix of this node; entity URIs are `{base_url}/{kind}/{id}`
    pub base_url: String,
    /// Domain this node federates as
    pub node_domain: String,
    pub logging: LoggingConfig,
    pub dedup: DedupConfig,
    pub review: ReviewConfig,
    pub federation: FederationConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
    pub geocoding: GeocodingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_address: "127.0.0.1:5780".to_string(),
            base_url: "http://localhost:5780".to_string(),
            node_domain: "localhost".to_string(),
            logging: LoggingConfig::default(),
            dedup: DedupConfig::default(),
            review: ReviewConfig::default(),
            federation: FederationConfig::default(),
            jobs: JobsConfig::default(),
            storage: StorageConfig::default(),
            geocoding: GeocodingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Similarity thresholds for the dedup engine
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum event similarity listed to admins as a potential duplicate
    pub near_duplicate_threshold: f64,
    /// Event similarity at or above which a submission merges into the existing event
    pub auto_merge_threshold: f64,
    /// Place/organization similarity at or above which the existing id is reused
    pub entity_match_threshold: f64,
    /// Place/organization similarity at or above which a new record is flagged for review
    pub entity_review_threshold: f64,
    /// Candidate events must start within this many hours of the submission
    pub date_window_hours: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: 0.4,
            auto_merge_threshold: 0.95,
            entity_match_threshold: 0.92,
            entity_review_threshold: 0.75,
            date_window_hours: 24,
        }
    }
}

/// Review queue policy knobs
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ReviewConfig {
    /// Sources at or above this trust level skip review; unset means never
    pub auto_approve_min_trust: Option<u8>,
    /// Events starting further out than this are flagged for review
    pub max_future_days: i64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            auto_approve_min_trust: None,
            max_future_days: 730,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FederationConfig {
    /// How long sync idempotency keys and their cached results are kept
    pub idempotency_retention_hours: i64,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            idempotency_retention_hours: 24,
        }
    }
}

/// Background job pool configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
    pub retry_initial_ms: u64,
    pub retry_backoff: u32,
    pub retry_max_ms: u64,
    /// Interval between scheduled sweep jobs
    pub sweep_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            job_timeout_secs: 60,
            retry_initial_ms: 1000,
            retry_backoff: 2,
            retry_max_ms: 300_000,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound on retrying a write that hit a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Nominatim search endpoint; geocoding is disabled when unset
    pub nominatim_url: Option<String>,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sel")
        .join("sel.db")
}

/// Locate the config file following the priority order above.
///
/// Returns `None` when no explicit path was given and the platform default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>, service_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let default = dirs::config_dir()?
        .join("sel")
        .join(format!("{}.toml", service_name));
    default.exists().then_some(default)
}

/// Parse configuration from TOML text
pub fn parse_config(toml_content: &str) -> Result<ServiceConfig> {
    toml::from_str(toml_content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
}

/// Load configuration, falling back to defaults when the file is missing
pub fn load_config(cli_arg: Option<&Path>, service_name: &str) -> Result<ServiceConfig> {
    let Some(path) = resolve_config_path(cli_arg, service_name) else {
        info!("No config file found, using compiled defaults");
        return Ok(ServiceConfig::default());
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let config = parse_config(&content)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            Ok(ServiceConfig::default())
        }
        Err(e) => Err(Error::Config(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_section_defaults() {
        let config = parse_config(
            r#"
            base_url = "https://events.example.org"

            [dedup]
            auto_merge_threshold = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.base_url, "https://events.example.org");
        assert_eq!(config.dedup.auto_merge_threshold, 0.9);
        assert_eq!(config.dedup.near_duplicate_threshold, 0.4);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.federation.idempotency_retention_hours, 24);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let result = parse_config("base_url = [unterminated");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
