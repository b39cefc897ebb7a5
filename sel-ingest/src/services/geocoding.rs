//! Geocoding port and Nominatim client
//!
//! Geocoding is an optional enrichment run by the `geocode_place` job. The
//! ingest path never waits on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

const USER_AGENT: &str = "sel-ingest/0.1.0";
/// Nominatim usage policy allows one request per second
const RATE_LIMIT_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Geocoder returned {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<GeocodeError> for sel_common::Error {
    fn from(err: GeocodeError) -> Self {
        sel_common::Error::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the address is unknown to the geocoder
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// Nominatim returns coordinates as strings
#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
}

fn parse_hits(hits: &[NominatimHit]) -> Result<Option<Coordinates>, GeocodeError> {
    let Some(hit) = hits.first() else {
        return Ok(None);
    };
    let latitude = hit
        .lat
        .parse::<f64>()
        .map_err(|e| GeocodeError::Parse(format!("lat '{}': {}", hit.lat, e)))?;
    let longitude = hit
        .lon
        .parse::<f64>()
        .map_err(|e| GeocodeError::Parse(format!("lon '{}': {}", hit.lon, e)))?;
    Ok(Some(Coordinates { latitude, longitude }))
}

pub struct NominatimGeocoder {
    http_client: reqwest::Client,
    search_url: String,
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl NominatimGeocoder {
    pub fn new(search_url: impl Into<String>) -> Result<Self, GeocodeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            search_url: search_url.into(),
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(RATE_LIMIT_MS),
        })
    }

    async fn wait_for_slot(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        self.wait_for_slot().await;

        tracing::debug!(address, "Querying geocoder");

        let response = self
            .http_client
            .get(&self.search_url)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| GeocodeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Api(status.as_u16(), body));
        }

        let hits: Vec<NominatimHit> = response
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;
        parse_hits(&hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hit_wins() {
        let hits: Vec<NominatimHit> = serde_json::from_str(
            r#"[{"lat": "43.6487", "lon": "-79.3883", "display_name": "x"}, {"lat": "0", "lon": "0"}]"#,
        )
        .unwrap();
        assert_eq!(
            parse_hits(&hits).unwrap(),
            Some(Coordinates {
                latitude: 43.6487,
                longitude: -79.3883
            })
        );
        assert_eq!(parse_hits(&[]).unwrap(), None);
    }

    #[test]
    fn garbage_coordinates_are_parse_errors() {
        let hits = vec![NominatimHit {
            lat: "north".into(),
            lon: "1".into(),
        }];
        assert!(matches!(parse_hits(&hits), Err(GeocodeError::Parse(_))));
    }

    #[test]
    fn client_builds() {
        assert!(NominatimGeocoder::new("https://nominatim.example/search").is_ok());
    }
}
