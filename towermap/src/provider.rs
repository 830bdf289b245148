//! Tower data provider.
//!
//! A [`TowerProvider`] answers one bounding-box query with the cells it
//! knows about. The bundled [`OpenCellIdClient`] talks to OpenCelliD's
//! `getInArea` endpoint.
//!
//! Fetches never fail: any transport error, timeout, non-200 status, or
//! malformed body yields an empty list and a warning in the log, so one bad
//! tile only reduces coverage of a multi-tile search.
//!
//! Raw provider cells are converted to typed [`Observation`]s here. Cells
//! without coordinates or with an unknown radio type are dropped.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{Result, TowerError};
use crate::geo::BoundingBox;
use crate::model::{Observation, RadioType, TowerKey};

/// Default OpenCelliD API base URL.
pub const DEFAULT_BASE_URL: &str = "https://opencellid.org/cell";

/// Source tag written to towers first seen through OpenCelliD.
pub const OPENCELLID_SOURCE: &str = "opencellid";

/// Largest area, in km², OpenCelliD accepts for one `getInArea` query.
pub const MAX_QUERY_AREA_KM2: f64 = 4.0;

/// Default timeout for a single tile request in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default cap on cells returned per tile.
const DEFAULT_RESULT_LIMIT: u32 = 1000;

/// A source of cell observations for one bounding box.
pub trait TowerProvider: Send + Sync {
    /// Fetch all cells inside `bbox`. Returns an empty list on any failure.
    fn fetch(&self, bbox: &BoundingBox) -> Vec<Observation>;

    /// Tag stored on towers first reported by this provider.
    fn source(&self) -> &str;
}

/// Configuration for the OpenCelliD client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base URL; `/getInArea` is appended.
    pub base_url: String,
    /// API key sent as the `key` query parameter.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum cells requested per tile.
    pub result_limit: u32,
}

impl ProviderConfig {
    /// Configuration for the public OpenCelliD API with the given key.
    pub fn opencellid(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            result_limit: DEFAULT_RESULT_LIMIT,
        }
    }

    /// Point the client at a different base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Set the per-tile result cap.
    pub fn with_result_limit(mut self, result_limit: u32) -> Self {
        self.result_limit = result_limit;
        self
    }
}

/// One cell as it appears in the provider's JSON.
#[derive(Debug, Deserialize)]
struct RawCell {
    #[serde(default)]
    cellid: u64,
    #[serde(default)]
    lac: u32,
    #[serde(default)]
    mcc: u16,
    #[serde(default)]
    mnc: u16,
    radio: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    range: Option<u32>,
    #[serde(rename = "averageSignalStrength")]
    average_signal_strength: Option<i32>,
    samples: Option<u32>,
}

impl RawCell {
    fn into_observation(self) -> Option<Observation> {
        let radio = match self.radio.as_deref() {
            None => RadioType::Gsm,
            Some(s) => match s.parse::<RadioType>() {
                Ok(radio) => radio,
                Err(e) => {
                    tracing::debug!(cellid = self.cellid, error = %e, "Dropping cell");
                    return None;
                }
            },
        };
        let (lat, lon) = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                tracing::debug!(cellid = self.cellid, "Dropping cell without coordinates");
                return None;
            }
        };

        Some(Observation {
            key: TowerKey {
                cell_id: self.cellid,
                lac: self.lac,
                mcc: self.mcc,
                mnc: self.mnc,
                radio,
            },
            lat,
            lon,
            range_m: self.range,
            signal_avg: self.average_signal_strength,
            samples: self.samples,
            operator: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AreaResponse {
    cells: Vec<serde_json::Value>,
}

/// Parse a `getInArea` JSON body into observations.
///
/// Individual cells that fail to parse are skipped; a body without a
/// `cells` array yields `None`.
fn parse_cells(body: &[u8]) -> Option<Vec<Observation>> {
    let response: AreaResponse = serde_json::from_slice(body).ok()?;
    Some(
        response
            .cells
            .into_iter()
            .filter_map(|value| serde_json::from_value::<RawCell>(value).ok())
            .filter_map(RawCell::into_observation)
            .collect(),
    )
}

/// Blocking OpenCelliD `getInArea` client.
pub struct OpenCellIdClient {
    client: Client,
    config: ProviderConfig,
}

impl OpenCellIdClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TowerError::ProviderClient {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// The client's configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/getInArea", self.config.base_url.trim_end_matches('/'))
    }

    fn try_fetch(&self, bbox: &BoundingBox) -> std::result::Result<Vec<Observation>, String> {
        let response = self
            .client
            .get(self.endpoint())
            .query(&[
                ("key", self.config.api_key.clone()),
                ("BBOX", bbox.to_bbox_param()),
                ("format", "json".to_string()),
                ("limit", self.config.result_limit.to_string()),
            ])
            .send()
            .map_err(|e| e.to_string())?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(format!("HTTP {}", response.status()));
        }

        let body = response.bytes().map_err(|e| e.to_string())?;
        parse_cells(&body).ok_or_else(|| "response has no cells array".to_string())
    }
}

impl TowerProvider for OpenCellIdClient {
    fn fetch(&self, bbox: &BoundingBox) -> Vec<Observation> {
        match self.try_fetch(bbox) {
            Ok(cells) => {
                tracing::debug!(bbox = %bbox.to_bbox_param(), cells = cells.len(), "Tile fetched");
                cells
            }
            Err(reason) => {
                tracing::warn!(bbox = %bbox.to_bbox_param(), %reason, "Tile fetch failed");
                Vec::new()
            }
        }
    }

    fn source(&self) -> &str {
        OPENCELLID_SOURCE
    }
}
