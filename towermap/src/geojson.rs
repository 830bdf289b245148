//! GeoJSON export of search results.
//!
//! Enable the `geojson` feature to use this module.
//!
//! # Example
//!
//! ```ignore
//! use towermap::geojson::towers_to_feature_collection;
//!
//! let result = cache.search(37.7749, -122.4194, 10.0)?;
//! let collection = towers_to_feature_collection(&result.towers);
//! println!("{}", collection);
//! ```

use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};

use crate::geo::BoundingBox;
use crate::model::TowerRecord;

/// Convert a tower to a Point feature.
///
/// The geometry is `[lon, lat]` in GeoJSON order. Every other tower field
/// becomes a property; the feature id is the tower id.
pub fn tower_to_feature(tower: &TowerRecord) -> Feature {
    let mut properties = match serde_json::to_value(tower) {
        Ok(JsonValue::Object(map)) => map,
        _ => JsonObject::new(),
    };
    properties.remove("lat");
    properties.remove("lon");

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![tower.lon, tower.lat]))),
        id: Some(Id::Number(tower.id.into())),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Convert towers to a FeatureCollection of Point features, preserving order.
pub fn towers_to_feature_collection(towers: &[TowerRecord]) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: towers.iter().map(tower_to_feature).collect(),
        foreign_members: None,
    }
}

/// Convert a bounding box to a closed Polygon geometry.
pub fn bbox_to_geometry(bbox: &BoundingBox) -> Geometry {
    let ring = vec![
        vec![bbox.min_lon, bbox.min_lat],
        vec![bbox.max_lon, bbox.min_lat],
        vec![bbox.max_lon, bbox.max_lat],
        vec![bbox.min_lon, bbox.max_lat],
        vec![bbox.min_lon, bbox.min_lat],
    ];
    Geometry::new(Value::Polygon(vec![ring]))
}
