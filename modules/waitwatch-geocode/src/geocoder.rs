use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use waitwatch_common::Coordinate;

use crate::error::{GeocodeError, Result};

/// External geocoding collaborator.
///
/// `Ok(None)` is the explicit "zero results" answer. Quota refusals and
/// transient failures come back as the matching `GeocodeError` variants so
/// the resolver can pick a backoff schedule.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>>;
    fn name(&self) -> &str;
}

/// Inputs longer than this are refused locally; the public instance rejects
/// them anyway.
const MAX_QUERY_LEN: usize = 300;

#[derive(Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

/// Nominatim `/search` client.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeocodeError::Rejected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinate>> {
        if query.len() > MAX_QUERY_LEN {
            return Err(GeocodeError::Rejected(format!(
                "Query too long (max {MAX_QUERY_LEN} chars)"
            )));
        }

        let resp = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .header("User-Agent", &self.user_agent)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::OverQuota);
        }
        if status.is_server_error() {
            return Err(GeocodeError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(GeocodeError::Rejected(format!("HTTP {status}")));
        }

        let results: Vec<NominatimResult> = resp.json().await?;
        let Some(first) = results.into_iter().next() else {
            debug!(query, "No geocoding results");
            return Ok(None);
        };

        let lat: f64 = first
            .lat
            .parse()
            .map_err(|_| GeocodeError::Rejected(format!("Bad latitude: {}", first.lat)))?;
        let lng: f64 = first
            .lon
            .parse()
            .map_err(|_| GeocodeError::Rejected(format!("Bad longitude: {}", first.lon)))?;
        Ok(Some(Coordinate::new(lat, lng)))
    }

    fn name(&self) -> &str {
        "nominatim"
    }
}
