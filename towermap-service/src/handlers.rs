//! HTTP request handlers for the tower search service.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use towermap::validate::validate_json_search;
use towermap::{SearchResult, TowerRecord};
use utoipa::ToSchema;

use crate::AppState;

/// Body of a search request.
///
/// Fields accept JSON numbers or numeric strings.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// Latitude in decimal degrees (-90 to 90).
    #[schema(value_type = f64)]
    pub lat: Option<Value>,
    /// Longitude in decimal degrees (-180 to 180).
    #[schema(value_type = f64)]
    pub lon: Option<Value>,
    /// Search radius in km (1 to 50, default 10).
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<f64>)]
    pub radius: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)` so it is told apart from a
/// missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A cached cell tower.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TowerResponse {
    pub id: u64,
    pub cell_id: u64,
    pub lac: u32,
    pub mcc: u16,
    pub mnc: u16,
    pub lat: f64,
    pub lon: f64,
    /// Radio technology: GSM, UMTS, LTE, CDMA or NR.
    pub radio: String,
    /// Estimated coverage range in meters.
    pub range_m: Option<u32>,
    /// Average signal strength in dBm.
    pub signal_avg: Option<i32>,
    pub samples: Option<u32>,
    /// Network operator name, when known.
    pub operator: Option<String>,
    /// Where the tower was first seen (e.g. "opencellid").
    pub source: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp.
    pub updated_at: String,
}

impl From<&TowerRecord> for TowerResponse {
    fn from(tower: &TowerRecord) -> Self {
        Self {
            id: tower.id,
            cell_id: tower.cell_id,
            lac: tower.lac,
            mcc: tower.mcc,
            mnc: tower.mnc,
            lat: tower.lat,
            lon: tower.lon,
            radio: tower.radio.to_string(),
            range_m: tower.range_m,
            signal_avg: tower.signal_avg,
            samples: tower.samples,
            operator: tower.operator.clone(),
            source: tower.source.clone(),
            created_at: tower.created_at.to_rfc3339(),
            updated_at: tower.updated_at.to_rfc3339(),
        }
    }
}

/// Search result.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    /// Towers in the search area, ordered by id.
    pub towers: Vec<TowerResponse>,
    pub count: usize,
    /// Answered from the local cache without calling the provider.
    pub cached: bool,
    /// The provider was skipped because today's quota is spent.
    pub rate_limited: bool,
    /// Advisory note about degraded or partial results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<SearchResult> for SearchResponse {
    fn from(result: SearchResult) -> Self {
        Self {
            towers: result.towers.iter().map(TowerResponse::from).collect(),
            count: result.count,
            cached: result.cached,
            rate_limited: result.rate_limited,
            message: result.message,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

/// Validation error response listing every rejected input.
#[derive(Debug, Serialize, ToSchema)]
pub struct ValidationErrorResponse {
    pub error: Vec<String>,
}

/// Quota and store overview.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub api_calls_today: u32,
    pub api_daily_limit: u32,
    pub api_key_configured: bool,
    pub total_towers: u64,
    /// Tower count per radio type.
    pub towers_by_radio: BTreeMap<String, u64>,
}

/// Search counters since startup.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub searches: u64,
    pub fresh_hits: u64,
    pub cache_only: u64,
    pub rate_limited: u64,
    pub fetches: u64,
    pub provider_calls: u64,
    pub tiles_skipped: u64,
    /// Fraction of searches answered without a provider call (0.0 to 1.0).
    pub cache_rate: f64,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{}: {}", context, e),
        }),
    )
        .into_response()
}

/// Search for towers around a point.
///
/// Served from cache when the area has fresh data, otherwise fetched from
/// OpenCelliD while today's quota lasts.
#[utoipa::path(
    post,
    path = "/api/towers/search",
    tag = "towers",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Towers in the search area", body = SearchResponse),
        (status = 400, description = "Invalid coordinates or radius", body = ValidationErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    )
)]
pub async fn search_towers(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrorResponse {
                    error: vec![rejection.body_text()],
                }),
            )
                .into_response();
        }
    };

    let params = match validate_json_search(
        request.lat.as_ref(),
        request.lon.as_ref(),
        request.radius.as_ref(),
        state.cache.config().radius_bounds,
    ) {
        Ok(params) => params,
        Err(errors) => {
            tracing::debug!(?errors, "Rejected search request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrorResponse { error: errors }),
            )
                .into_response();
        }
    };

    let search_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        search_state
            .cache
            .search(params.lat, params.lon, params.radius_km)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => {
            tracing::info!(
                lat = params.lat,
                lon = params.lon,
                radius_km = params.radius_km,
                count = result.count,
                cached = result.cached,
                rate_limited = result.rate_limited,
                "Search served"
            );
            (StatusCode::OK, Json(SearchResponse::from(result))).into_response()
        }
        Ok(Err(e)) => internal_error("Search failed", e),
        Err(e) => internal_error("Search task failed", e),
    }
}

/// Get a cached tower by id.
#[utoipa::path(
    get,
    path = "/api/towers/{id}",
    tag = "towers",
    params(("id" = u64, Path, description = "Tower id")),
    responses(
        (status = 200, description = "Tower found", body = TowerResponse),
        (status = 404, description = "No tower with this id", body = ErrorResponse)
    )
)]
pub async fn get_tower(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    let outcome = tokio::task::spawn_blocking(move || state.cache.tower(id)).await;

    match outcome {
        Ok(Ok(Some(tower))) => (StatusCode::OK, Json(TowerResponse::from(&tower))).into_response(),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Tower not found".to_string(),
            }),
        )
            .into_response(),
        Ok(Err(e)) => internal_error("Tower lookup failed", e),
        Err(e) => internal_error("Tower lookup task failed", e),
    }
}

/// Quota usage and cached tower counts.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    responses(
        (status = 200, description = "Service status", body = StatusResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    )
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    let outcome = tokio::task::spawn_blocking(move || state.cache.status()).await;

    match outcome {
        Ok(Ok(status)) => Json(StatusResponse {
            api_calls_today: status.api_calls_today,
            api_daily_limit: status.api_daily_limit,
            api_key_configured: status.api_key_configured,
            total_towers: status.total_towers,
            towers_by_radio: status.towers_by_radio,
        })
        .into_response(),
        Ok(Err(e)) => internal_error("Status query failed", e),
        Err(e) => internal_error("Status task failed", e),
    }
}

/// Search counters since startup.
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "system",
    responses((status = 200, description = "Search counters", body = StatsResponse))
)]
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.cache.stats();

    Json(StatsResponse {
        searches: stats.searches,
        fresh_hits: stats.fresh_hits,
        cache_only: stats.cache_only,
        rate_limited: stats.rate_limited,
        fetches: stats.fetches,
        provider_calls: stats.provider_calls,
        tiles_skipped: stats.tiles_skipped,
        cache_rate: stats.cache_rate(),
    })
}

/// Health check endpoint.
///
/// Returns service status and version.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
