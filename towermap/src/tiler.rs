//! Partitioning of a circular search area into provider-sized tiles.
//!
//! The provider caps the area of a single `getInArea` query, so a search
//! over a larger radius is split into a grid of boxes no wider or taller
//! than `max_tile_km`. The grid covers the bounding rectangle of the search
//! disc, walking row-major from the southwest corner; the last row and
//! column are clipped to the rectangle rather than overshooting it.
//!
//! # Limitations
//!
//! Degrees are converted with the flat approximation in [`crate::geo`].
//! Searches that cross the antimeridian or reach a pole yield boxes outside
//! ±180° / ±90°; they are passed to the provider as-is.
//!
//! # Example
//!
//! ```
//! use towermap::tiler::tile;
//!
//! let tiles = tile(37.7749, -122.4194, 10.0, 1.5);
//! assert_eq!(tiles.len(), 14 * 14);
//! ```

use crate::geo::{km_to_lat_degrees, km_to_lon_degrees, BoundingBox};

/// Remaining spans thinner than this (in degrees) do not get their own tile.
const SLIVER_DEGREES: f64 = 1e-9;

/// Lazy, restartable sequence of tiles covering a search rectangle.
///
/// Cloning yields an independent iterator positioned at the same tile, so a
/// fresh clone taken before iteration replays the full sequence.
#[derive(Debug, Clone)]
pub struct Tiles {
    bounds: BoundingBox,
    lat_step: f64,
    lon_step: f64,
    rows: usize,
    cols: usize,
    next: usize,
}

impl Tiles {
    /// The rectangle being covered.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Grid dimensions as `(rows, cols)`.
    pub fn grid(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn total(&self) -> usize {
        self.rows * self.cols
    }

    fn tile_at(&self, index: usize) -> BoundingBox {
        let row = index / self.cols;
        let col = index % self.cols;

        let min_lat = self.bounds.min_lat + row as f64 * self.lat_step;
        let min_lon = self.bounds.min_lon + col as f64 * self.lon_step;

        BoundingBox::new(
            min_lat,
            min_lon,
            (min_lat + self.lat_step).min(self.bounds.max_lat),
            (min_lon + self.lon_step).min(self.bounds.max_lon),
        )
    }
}

impl Iterator for Tiles {
    type Item = BoundingBox;

    fn next(&mut self) -> Option<BoundingBox> {
        if self.next >= self.total() {
            return None;
        }
        let tile = self.tile_at(self.next);
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Tiles {}

/// Number of grid steps needed to cover `span` with steps of `step`.
fn steps(span: f64, step: f64) -> usize {
    let usable = span - SLIVER_DEGREES;
    if usable <= 0.0 || !step.is_finite() || step <= 0.0 {
        return 0;
    }
    (usable / step).ceil() as usize
}

/// Partition the disc of `radius_km` around a center into tiles whose sides
/// do not exceed `max_tile_km`.
///
/// # Arguments
///
/// * `center_lat` - Center latitude in decimal degrees
/// * `center_lon` - Center longitude in decimal degrees
/// * `radius_km` - Search radius in kilometers
/// * `max_tile_km` - Maximum tile side in kilometers
///
/// A non-positive radius or tile size yields an empty sequence.
pub fn tile(center_lat: f64, center_lon: f64, radius_km: f64, max_tile_km: f64) -> Tiles {
    let bounds = BoundingBox::around(center_lat, center_lon, radius_km);
    let lat_step = km_to_lat_degrees(max_tile_km);
    let lon_step = km_to_lon_degrees(max_tile_km, center_lat);

    let rows = steps(bounds.max_lat - bounds.min_lat, lat_step);
    let cols = steps(bounds.max_lon - bounds.min_lon, lon_step);

    Tiles {
        bounds,
        lat_step,
        lon_step,
        rows,
        cols,
        next: 0,
    }
}
