//! Validation of search inputs.
//!
//! The search engine assumes its inputs are already in range; callers
//! (the HTTP service and the CLI) run them through [`validate_search`] first.

use serde_json::Value;

/// Smallest accepted search radius in km.
pub const MIN_RADIUS_KM: f64 = 1.0;

/// Largest accepted search radius in km.
pub const MAX_RADIUS_KM: f64 = 50.0;

/// Radius used when the caller does not give one.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// Inclusive bounds for the search radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusBounds {
    pub min_km: f64,
    pub max_km: f64,
}

impl Default for RadiusBounds {
    fn default() -> Self {
        Self {
            min_km: MIN_RADIUS_KM,
            max_km: MAX_RADIUS_KM,
        }
    }
}

/// A search request whose values are known to be in range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

/// Check a latitude in decimal degrees.
pub fn validate_lat(lat: f64) -> Result<f64, String> {
    if !lat.is_finite() {
        return Err("Invalid latitude".to_string());
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err("Latitude must be between -90 and 90".to_string());
    }
    Ok(lat)
}

/// Check a longitude in decimal degrees.
pub fn validate_lon(lon: f64) -> Result<f64, String> {
    if !lon.is_finite() {
        return Err("Invalid longitude".to_string());
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err("Longitude must be between -180 and 180".to_string());
    }
    Ok(lon)
}

/// Check a radius in km against `bounds`.
pub fn validate_radius(radius_km: f64, bounds: RadiusBounds) -> Result<f64, String> {
    if !radius_km.is_finite() {
        return Err("Invalid radius".to_string());
    }
    if radius_km < bounds.min_km || radius_km > bounds.max_km {
        return Err(format!(
            "Radius must be between {} and {} km",
            bounds.min_km, bounds.max_km
        ));
    }
    Ok(radius_km)
}

/// Validate a full search request, collecting every problem.
///
/// A missing radius falls back to [`DEFAULT_RADIUS_KM`].
pub fn validate_search(
    lat: f64,
    lon: f64,
    radius_km: Option<f64>,
    bounds: RadiusBounds,
) -> Result<SearchParams, Vec<String>> {
    collect(
        validate_lat(lat),
        validate_lon(lon),
        validate_radius(radius_km.unwrap_or(DEFAULT_RADIUS_KM), bounds),
    )
}

/// Read a JSON number, numeric string or boolean as `f64`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Validate a search request given as loosely typed JSON fields.
///
/// Missing or non-numeric coordinates are reported as "Invalid latitude" /
/// "Invalid longitude" alongside any other problem. An absent radius falls
/// back to [`DEFAULT_RADIUS_KM`]; an explicit `null` is invalid.
pub fn validate_json_search(
    lat: Option<&Value>,
    lon: Option<&Value>,
    radius_km: Option<&Value>,
    bounds: RadiusBounds,
) -> Result<SearchParams, Vec<String>> {
    let lat = lat
        .and_then(coerce_number)
        .ok_or_else(|| "Invalid latitude".to_string())
        .and_then(validate_lat);
    let lon = lon
        .and_then(coerce_number)
        .ok_or_else(|| "Invalid longitude".to_string())
        .and_then(validate_lon);
    let radius = match radius_km {
        None => validate_radius(DEFAULT_RADIUS_KM, bounds),
        Some(value) => coerce_number(value)
            .ok_or_else(|| "Invalid radius".to_string())
            .and_then(|r| validate_radius(r, bounds)),
    };
    collect(lat, lon, radius)
}

fn collect(
    lat: Result<f64, String>,
    lon: Result<f64, String>,
    radius: Result<f64, String>,
) -> Result<SearchParams, Vec<String>> {
    match (lat, lon, radius) {
        (Ok(lat), Ok(lon), Ok(radius_km)) => Ok(SearchParams {
            lat,
            lon,
            radius_km,
        }),
        (lat, lon, radius) => Err([lat.err(), lon.err(), radius.err()]
            .into_iter()
            .flatten()
            .collect()),
    }
}
