#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Great-circle geometry shared by deduplication and route attribution.
//!
//! Every distance in the system goes through [`haversine_m`]. Coordinates
//! are always carried as `(lat, lon)` in [`Coordinates`]; raw pairs whose
//! axis order is unknown are resolved once by [`normalize_pair`] at the
//! ingestion boundary and never re-interpreted afterwards.

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

/// Approximate meters per degree of latitude.
///
/// Deliberately slightly under the true value (~111 320 m) so that boxes
/// derived from it always contain the requested radius.
pub const METERS_PER_DEGREE_LAT: f64 = 111_000.0;

/// Default service region: Tyne and Wear, UK.
pub const DEFAULT_SERVICE_REGION: BoundingBox = BoundingBox {
    min_lat: 54.78,
    max_lat: 55.15,
    min_lon: -1.85,
    max_lon: -1.30,
};

/// A WGS84 position in `(lat, lon)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees, `-90..=90`.
    pub lat: f64,
    /// Longitude in degrees, `-180..=180`.
    pub lon: f64,
}

impl Coordinates {
    /// Creates a coordinate pair, rejecting non-finite or out-of-range values.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }

    /// Whether both components are finite and within WGS84 range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::new(self.lat, self.lon).is_some()
    }

    /// Great-circle distance to `other` in meters.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        haversine_m(*self, *other)
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

/// Great-circle (haversine) distance between two positions, in meters.
#[must_use]
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    Haversine.distance(a.to_point(), b.to_point())
}

/// Resolves a raw two-number pair of unknown axis order into [`Coordinates`].
///
/// The pair is read as `(lat, lon)` unless only the swapped reading is a
/// valid position, or unless `region` is given and only the swapped reading
/// falls inside it (feeds that publish `GeoJSON`-style `[lon, lat]`).
#[must_use]
pub fn normalize_pair(
    first: f64,
    second: f64,
    region: Option<&BoundingBox>,
) -> Option<Coordinates> {
    let as_given = Coordinates::new(first, second);
    let swapped = Coordinates::new(second, first);

    match (as_given, swapped) {
        (Some(given), Some(swapped)) => {
            if let Some(region) = region
                && !region.contains(&given)
                && region.contains(&swapped)
            {
                log::trace!("Swapping [{first}, {second}] into (lat, lon) order");
                return Some(swapped);
            }
            Some(given)
        }
        (Some(given), None) => Some(given),
        (None, Some(swapped)) => Some(swapped),
        (None, None) => None,
    }
}

/// An axis-aligned latitude/longitude rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        DEFAULT_SERVICE_REGION
    }
}

impl BoundingBox {
    /// Whether `point` lies inside the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lon..=self.max_lon).contains(&point.lon)
    }

    /// The smallest box guaranteed to contain every point within
    /// `radius_m` of `center`.
    #[must_use]
    pub fn around(center: &Coordinates, radius_m: f64) -> Self {
        let dlat = radius_m / METERS_PER_DEGREE_LAT;
        let cos_lat = center.lat.to_radians().cos().max(0.01);
        let dlon = radius_m / (METERS_PER_DEGREE_LAT * cos_lat);

        Self {
            min_lat: (center.lat - dlat).max(-90.0),
            max_lat: (center.lat + dlat).min(90.0),
            min_lon: (center.lon - dlon).max(-180.0),
            max_lon: (center.lon + dlon).min(180.0),
        }
    }

    /// Checks that the box is finite, in range, and not inverted.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let corners = [
            Coordinates::new(self.min_lat, self.min_lon),
            Coordinates::new(self.max_lat, self.max_lon),
        ];
        if corners.iter().any(Option::is_none) {
            return Err(format!("bounding box {self:?} has out-of-range corners"));
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(format!("bounding box {self:?} is empty or inverted"));
        }
        Ok(())
    }
}

/// A cell in a fixed-size latitude/longitude grid.
///
/// Used to bucket shape points so a radius query only touches the few cells
/// overlapping its bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    /// `floor(lat / cell_size)`.
    pub row: i32,
    /// `floor(lon / cell_size)`.
    pub col: i32,
}

impl GridCell {
    /// The cell containing `point`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn containing(point: &Coordinates, cell_size_deg: f64) -> Self {
        Self {
            row: (point.lat / cell_size_deg).floor() as i32,
            col: (point.lon / cell_size_deg).floor() as i32,
        }
    }

    /// All cells overlapping `bbox`, row-major.
    #[must_use]
    pub fn covering(bbox: &BoundingBox, cell_size_deg: f64) -> Vec<Self> {
        let low = Self::containing(
            &Coordinates {
                lat: bbox.min_lat,
                lon: bbox.min_lon,
            },
            cell_size_deg,
        );
        let high = Self::containing(
            &Coordinates {
                lat: bbox.max_lat,
                lon: bbox.max_lon,
            },
            cell_size_deg,
        );

        (low.row..=high.row)
            .flat_map(|row| (low.col..=high.col).map(move |col| Self { row, col }))
            .collect()
    }
}
