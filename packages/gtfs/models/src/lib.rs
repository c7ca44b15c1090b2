#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for transit geometry loading and route attribution.
//!
//! Records mirror the three static tables the service reads (`routes.txt`,
//! `trips.txt`, `shapes.txt`); the configuration types carry the knobs for
//! the streaming loader and the route matcher.

use std::path::PathBuf;

use incident_hub_spatial::{BoundingBox, Coordinates};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default streaming chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// Default number of records between memory checks.
pub const DEFAULT_MEMORY_CHECK_INTERVAL: u64 = 500;

/// Default resident memory ceiling in megabytes.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 256;

/// Default cap on shape records inspected by one lookup.
pub const DEFAULT_MAX_RECORDS_PER_LOOKUP: u64 = 50_000;

/// Default cap on records read while building an index or cache.
pub const DEFAULT_MAX_RECORDS_PER_BUILD: u64 = 5_000_000;

/// Default capacity of the regional shape cache, in grid cells.
pub const DEFAULT_SHAPE_CACHE_CAPACITY: usize = 20_000;

/// Cells kept when the shape cache is trimmed under memory pressure.
pub const DEFAULT_SHAPE_CACHE_TRIM_TO: usize = 5_000;

/// Default search radii in meters, smallest first.
pub const DEFAULT_RADII_M: [u32; 3] = [100, 250, 500];

/// Default grid cell size for the regional shape cache, in degrees.
pub const DEFAULT_CELL_SIZE_DEG: f64 = 0.005;

/// One row of `routes.txt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    /// Feed-internal route id.
    pub route_id: String,
    /// Public short name (e.g. `"Q3"`).
    pub short_name: String,
}

/// One vertex of a route's physical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapePoint {
    /// Shape the vertex belongs to.
    pub shape_id: String,
    /// Position along the shape.
    pub sequence: u32,
    /// Vertex position.
    pub coordinates: Coordinates,
}

/// A route/shape association taken from one row of `trips.txt`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TripLink {
    /// Route served by the trip.
    pub route_id: String,
    /// Shape the trip follows.
    pub shape_id: String,
}

/// Health of an index snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IndexStatus {
    /// Built successfully with at least one shape mapped.
    Ready,
    /// Built successfully but nothing could be mapped.
    #[default]
    Empty,
    /// Construction failed; the index is empty.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl IndexStatus {
    /// Whether the index can serve geometry lookups.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether construction failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Counters from one index build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Routes read from the route table.
    pub routes_loaded: usize,
    /// Data rows read from the trip table.
    pub trip_rows_read: u64,
    /// Distinct route/shape links kept.
    pub trip_links_kept: usize,
    /// Distinct shapes mapped to at least one route.
    pub shapes_indexed: usize,
    /// Rows skipped for missing or empty fields.
    pub rows_skipped: u64,
    /// Trip rows naming a route absent from the route table.
    pub unknown_route_rows: u64,
    /// Whether a record cap cut a table short.
    pub truncated: bool,
    /// Wall-clock build time.
    pub build_ms: u64,
}

/// How sure the matcher is about a result.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchConfidence {
    /// Nothing matched.
    #[default]
    None,
    /// Matched by text only.
    Low,
    /// Matched by geometry at a wider radius.
    Medium,
    /// Matched by geometry at the smallest radius.
    High,
}

/// Which strategy produced a result.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchMethod {
    /// Shape points within a search radius.
    Geometry,
    /// Corridor keywords or explicit route mentions in free text.
    Text,
    /// No strategy matched.
    #[default]
    None,
}

/// Routes attributed to one location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatchResult {
    /// Route short names, sorted ascending and unique.
    pub routes: Vec<String>,
    /// Radius tier that produced the match, for geometry matches.
    pub radius_used: Option<u32>,
    /// Confidence tier.
    pub confidence: MatchConfidence,
    /// Strategy that produced the match.
    pub method: MatchMethod,
}

impl RouteMatchResult {
    /// The empty result.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether no routes were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Streaming loader limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Bytes read per chunk.
    pub chunk_size_bytes: usize,
    /// Records processed between memory checks.
    pub memory_check_interval: u64,
    /// Resident memory ceiling in megabytes.
    pub max_memory_mb: u64,
    /// Shape records inspected by one radius scan before giving up.
    ///
    /// The matcher scans once per radius tier, so a single streaming lookup
    /// that widens through every radius can read up to `radii_m.len()` times
    /// this many records. The regional cache applies the same number to the
    /// cached points it visits per radius.
    pub max_records_per_lookup: u64,
    /// Records read per table while building an index or cache.
    pub max_records_per_build: u64,
    /// Grid cells held by the regional shape cache.
    pub shape_cache_capacity: usize,
    /// Grid cells kept when the cache is trimmed under memory pressure.
    pub shape_cache_trim_to: usize,
    /// Shape points outside this box are discarded as they are read.
    pub service_region: BoundingBox,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            memory_check_interval: DEFAULT_MEMORY_CHECK_INTERVAL,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            max_records_per_lookup: DEFAULT_MAX_RECORDS_PER_LOOKUP,
            max_records_per_build: DEFAULT_MAX_RECORDS_PER_BUILD,
            shape_cache_capacity: DEFAULT_SHAPE_CACHE_CAPACITY,
            shape_cache_trim_to: DEFAULT_SHAPE_CACHE_TRIM_TO,
            service_region: BoundingBox::default(),
        }
    }
}

impl LoaderConfig {
    /// Rejects limits that would stall or disable the loader.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size_bytes == 0 {
            return Err("loader.chunk_size_bytes must be greater than zero".to_string());
        }
        if self.memory_check_interval == 0 {
            return Err("loader.memory_check_interval must be greater than zero".to_string());
        }
        if self.max_memory_mb == 0 {
            return Err("loader.max_memory_mb must be greater than zero".to_string());
        }
        if self.max_records_per_lookup == 0 || self.max_records_per_build == 0 {
            return Err("loader record caps must be greater than zero".to_string());
        }
        if self.shape_cache_capacity == 0 {
            return Err("loader.shape_cache_capacity must be greater than zero".to_string());
        }
        if self.shape_cache_trim_to > self.shape_cache_capacity {
            return Err(format!(
                "loader.shape_cache_trim_to ({}) exceeds shape_cache_capacity ({})",
                self.shape_cache_trim_to, self.shape_cache_capacity
            ));
        }
        self.service_region
            .validate()
            .map_err(|e| format!("loader.service_region: {e}"))
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub const fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }
}

/// Route matcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Search radii in meters, strictly ascending.
    pub radii_m: Vec<u32>,
    /// Serve scans from an in-memory regional cache instead of
    /// re-streaming the shapes file per scan.
    pub use_regional_cache: bool,
    /// Grid cell size for the regional cache, in degrees.
    pub cell_size_deg: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            radii_m: DEFAULT_RADII_M.to_vec(),
            use_regional_cache: true,
            cell_size_deg: DEFAULT_CELL_SIZE_DEG,
        }
    }
}

impl MatcherConfig {
    /// Rejects empty, zero or non-ascending radii and bad cell sizes.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.radii_m.is_empty() {
            return Err("matcher.radii_m must not be empty".to_string());
        }
        if self.radii_m.contains(&0) {
            return Err("matcher.radii_m must not contain zero".to_string());
        }
        if self.radii_m.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!(
                "matcher.radii_m must be strictly ascending, got {:?}",
                self.radii_m
            ));
        }
        if !self.cell_size_deg.is_finite() || self.cell_size_deg <= 0.0 {
            return Err(format!(
                "matcher.cell_size_deg must be positive, got {}",
                self.cell_size_deg
            ));
        }
        Ok(())
    }
}

/// Where the static tables live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtfsFilesConfig {
    /// Directory holding the tables.
    pub dir: PathBuf,
    /// Route table file name.
    pub routes_file: String,
    /// Trip table file name.
    pub trips_file: String,
    /// Shape table file name.
    pub shapes_file: String,
}

impl Default for GtfsFilesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/gtfs"),
            routes_file: "routes.txt".to_string(),
            trips_file: "trips.txt".to_string(),
            shapes_file: "shapes.txt".to_string(),
        }
    }
}

impl GtfsFilesConfig {
    /// Full path of the route table.
    #[must_use]
    pub fn routes_path(&self) -> PathBuf {
        self.dir.join(&self.routes_file)
    }

    /// Full path of the trip table.
    #[must_use]
    pub fn trips_path(&self) -> PathBuf {
        self.dir.join(&self.trips_file)
    }

    /// Full path of the shape table.
    #[must_use]
    pub fn shapes_path(&self) -> PathBuf {
        self.dir.join(&self.shapes_file)
    }
}
