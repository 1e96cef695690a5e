//! HTTP client for the open-data road-works endpoint.
//!
//! The endpoint answers with an envelope of the form
//! `{ "total_count": n, "results": [{ "geo_point_2d": {"lat", "lon"}, "libelle" }] }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{FetchError, RecordFetcher};
use crate::models::RawRecord;

// ============================================================================
// Constants
// ============================================================================

/// Road-works sites located at intersections, Bordeaux Métropole open data.
pub const DEFAULT_SOURCE_URL: &str = "https://opendata.bordeaux-metropole.fr/api/explore/v2.1/catalog/datasets/ci_chantier/records?select=*&where=localisation%20LIKE%20%22l%27intersection%22&limit=100";

/// HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    total_count: Option<u64>,
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    lat: Option<f64>,
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenDataResult {
    geo_point_2d: Option<GeoPoint>,
    libelle: Option<String>,
}

impl From<OpenDataResult> for RawRecord {
    fn from(result: OpenDataResult) -> Self {
        let (latitude, longitude) = match result.geo_point_2d {
            Some(point) => (point.lat, point.lon),
            None => (None, None),
        };
        RawRecord {
            latitude,
            longitude,
            label: result.libelle,
        }
    }
}

/// Parse an open-data envelope into raw records.
///
/// An entry whose shape does not match becomes an empty `RawRecord` so that it
/// is reported and skipped at ingestion instead of failing the whole batch.
pub fn parse_open_data(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FetchError::InvalidResponse(format!("Unexpected payload: {}", e)))?;

    let count = envelope.results.len();
    if let Some(total) = envelope.total_count {
        if (count as u64) < total {
            info!(count, total, "Source returned a partial page of results");
        }
    }

    Ok(envelope
        .results
        .into_iter()
        .map(|value| match serde_json::from_value::<OpenDataResult>(value) {
            Ok(result) => result.into(),
            Err(e) => {
                debug!(error = %e, "Unrecognized result entry");
                RawRecord::default()
            }
        })
        .collect())
}

/// Fetches records over HTTP.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct OpenDataClient {
    client: Client,
    url: String,
}

impl OpenDataClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_body(&self) -> Result<String, FetchError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&self.url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response.text().await?);
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(FetchError::RateLimited);
                }
                warn!(url = %self.url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(status, &body));
        }
    }
}

#[async_trait]
impl RecordFetcher for OpenDataClient {
    async fn fetch_records(&self) -> Result<Vec<RawRecord>, FetchError> {
        debug!(url = %self.url, "Fetching records");
        let body = self.get_body().await?;
        parse_open_data(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
