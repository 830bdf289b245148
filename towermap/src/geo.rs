//! Flat-degree geometry helpers.
//!
//! All conversions use a fixed [`KM_PER_DEGREE`] for latitude and scale
//! longitude by the cosine of the center latitude. This is an approximation:
//! areas crossing the antimeridian or touching a pole produce boxes that
//! extend past ±180° / ±90° and are not wrapped or clamped.

/// Kilometers per degree of latitude.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Floor applied to `|cos(lat)|` so longitude spans stay finite near the poles.
pub const MIN_COS_LAT: f64 = 0.01;

/// Cosine of `lat` (degrees), clamped to [`MIN_COS_LAT`].
pub fn cos_lat(lat: f64) -> f64 {
    lat.to_radians().cos().abs().max(MIN_COS_LAT)
}

/// Convert a north-south distance in km to degrees of latitude.
pub fn km_to_lat_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Convert an east-west distance in km to degrees of longitude at `lat`.
pub fn km_to_lon_degrees(km: f64, lat: f64) -> f64 {
    km / (KM_PER_DEGREE * cos_lat(lat))
}

/// A geographic bounding box.
///
/// Coordinates are in decimal degrees (WGS84). Containment is inclusive on
/// every edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum latitude (southern boundary).
    pub min_lat: f64,
    /// Minimum longitude (western boundary).
    pub min_lon: f64,
    /// Maximum latitude (northern boundary).
    pub max_lat: f64,
    /// Maximum longitude (eastern boundary).
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    ///
    /// # Arguments
    ///
    /// * `min_lat` - Southern boundary latitude
    /// * `min_lon` - Western boundary longitude
    /// * `max_lat` - Northern boundary latitude
    /// * `max_lon` - Eastern boundary longitude
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// The rectangle enclosing the disc of `radius_km` around a center point.
    pub fn around(lat: f64, lon: f64, radius_km: f64) -> Self {
        let delta_lat = km_to_lat_degrees(radius_km);
        let delta_lon = km_to_lon_degrees(radius_km, lat);
        Self::new(
            lat - delta_lat,
            lon - delta_lon,
            lat + delta_lat,
            lon + delta_lon,
        )
    }

    /// Check whether a point lies inside the box (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Height of the box in km.
    pub fn height_km(&self) -> f64 {
        (self.max_lat - self.min_lat) * KM_PER_DEGREE
    }

    /// Width of the box in km, measured at latitude `at_lat`.
    pub fn width_km(&self, at_lat: f64) -> f64 {
        (self.max_lon - self.min_lon) * KM_PER_DEGREE * cos_lat(at_lat)
    }

    /// Provider `BBOX` parameter: `min_lat,min_lon,max_lat,max_lon` to 6 decimals.
    pub fn to_bbox_param(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{:.6}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// A circular search area. Only used to derive a [`BoundingBox`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRegion {
    /// Center latitude in decimal degrees.
    pub lat: f64,
    /// Center longitude in decimal degrees.
    pub lon: f64,
    /// Radius in kilometers.
    pub radius_km: f64,
}

impl SearchRegion {
    /// Create a new search region.
    pub fn new(lat: f64, lon: f64, radius_km: f64) -> Self {
        Self { lat, lon, radius_km }
    }

    /// The bounding rectangle of this region.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::around(self.lat, self.lon, self.radius_km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_around_equator() {
        let bbox = BoundingBox::around(0.0, 0.0, 111.0);
        assert!((bbox.min_lat + 1.0).abs() < 1e-9);
        assert!((bbox.max_lat - 1.0).abs() < 1e-9);
        assert!((bbox.min_lon + 1.0).abs() < 1e-9);
        assert!((bbox.max_lon - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_around_widens_with_latitude() {
        let equator = BoundingBox::around(0.0, 0.0, 10.0);
        let north = BoundingBox::around(60.0, 0.0, 10.0);

        // Same latitude span, longitude span doubles at 60° (cos = 0.5)
        assert!((equator.height_km() - north.height_km()).abs() < 1e-9);
        let ratio = (north.max_lon - north.min_lon) / (equator.max_lon - equator.min_lon);
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_cos_lat_floor_at_pole() {
        assert_eq!(cos_lat(90.0), MIN_COS_LAT);
        assert_eq!(cos_lat(-90.0), MIN_COS_LAT);
        assert!((cos_lat(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_contains_inclusive() {
        let bbox = BoundingBox::new(10.0, 20.0, 11.0, 21.0);
        assert!(bbox.contains(10.0, 20.0));
        assert!(bbox.contains(11.0, 21.0));
        assert!(bbox.contains(10.5, 20.5));
        assert!(!bbox.contains(9.999, 20.5));
        assert!(!bbox.contains(10.5, 21.001));
    }

    #[test]
    fn test_bbox_param_format() {
        let bbox = BoundingBox::new(37.7, -122.5, 37.71351351, -122.48);
        assert_eq!(
            bbox.to_bbox_param(),
            "37.700000,-122.500000,37.713514,-122.480000"
        );
    }

    #[test]
    fn test_search_region_bounding_box() {
        let region = SearchRegion::new(37.7749, -122.4194, 10.0);
        let bbox = region.bounding_box();
        assert!(bbox.contains(37.7749, -122.4194));
        assert!((bbox.height_km() - 20.0).abs() < 1e-9);
        assert!((bbox.width_km(37.7749) - 20.0).abs() < 1e-9);
    }
}
