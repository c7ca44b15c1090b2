//! Radius queries over shape points.
//!
//! [`StreamingShapeSource`] re-reads the shapes table for every query and
//! keeps nothing in memory between calls. [`RegionalShapeCache`] reads it
//! once into grid cells and answers queries by scanning only the cells that
//! overlap the query's bounding box.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use incident_hub_gtfs_models::ShapePoint;
use incident_hub_spatial::{BoundingBox, Coordinates, GridCell};

use crate::GtfsError;
use crate::cache::BoundedCache;
use crate::loader::{Flow, GeoStreamLoader, ShapePointSink, ShapeStreamStats};

/// Finds shapes passing near a point.
pub trait ShapeSource: Send + Sync {
    /// Ids of shapes with at least one point within `radius_m` meters of
    /// `target`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data cannot be read.
    fn shapes_within(&self, target: Coordinates, radius_m: f64)
    -> Result<BTreeSet<String>, GtfsError>;
}

/// Streams the shapes table once per query.
#[derive(Debug, Clone)]
pub struct StreamingShapeSource {
    loader: GeoStreamLoader,
    path: PathBuf,
}

impl StreamingShapeSource {
    /// Queries `path` using `loader`'s limits. Each call streams the file
    /// from the start and inspects at most `max_records_per_lookup` rows, so
    /// the budget is per radius rather than per incident.
    #[must_use]
    pub const fn new(loader: GeoStreamLoader, path: PathBuf) -> Self {
        Self { loader, path }
    }
}

impl ShapeSource for StreamingShapeSource {
    fn shapes_within(
        &self,
        target: Coordinates,
        radius_m: f64,
    ) -> Result<BTreeSet<String>, GtfsError> {
        let mut scan = RadiusScan::new(target, radius_m);
        let stats = self.loader.stream_shape_points(
            &self.path,
            self.loader.config().max_records_per_lookup,
            &mut scan,
        )?;
        log::trace!(
            "Scanned {} shape rows within {radius_m} m of ({}, {}): {} shapes{}",
            stats.stream.records_read,
            target.lat,
            target.lon,
            scan.found.len(),
            if stats.stream.truncated { " (truncated)" } else { "" }
        );
        Ok(scan.found)
    }
}

struct RadiusScan {
    target: Coordinates,
    radius_m: f64,
    bbox: BoundingBox,
    found: BTreeSet<String>,
}

impl RadiusScan {
    fn new(target: Coordinates, radius_m: f64) -> Self {
        Self {
            target,
            radius_m,
            bbox: BoundingBox::around(&target, radius_m),
            found: BTreeSet::new(),
        }
    }
}

impl ShapePointSink for RadiusScan {
    fn on_point(&mut self, point: ShapePoint) -> Flow {
        if self.bbox.contains(&point.coordinates)
            && !self.found.contains(&point.shape_id)
            && self.target.distance_m(&point.coordinates) <= self.radius_m
        {
            self.found.insert(point.shape_id);
        }
        Flow::Continue
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPoint {
    shape: u32,
    coordinates: Coordinates,
}

/// Shape points bucketed into grid cells, held in a bounded cache.
///
/// Cells evicted on overflow or under memory pressure are gone until the
/// next load, so a cache smaller than the region trades recall for memory.
#[derive(Debug)]
pub struct RegionalShapeCache {
    cells: BoundedCache<GridCell, Vec<CachedPoint>>,
    shape_ids: Vec<String>,
    cell_size_deg: f64,
    max_points_per_lookup: u64,
    load_stats: ShapeStreamStats,
}

impl RegionalShapeCache {
    /// Streams the shapes table at `path` into a new cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be streamed.
    pub fn load(
        loader: &GeoStreamLoader,
        path: &Path,
        cell_size_deg: f64,
    ) -> Result<Self, GtfsError> {
        let config = loader.config();
        let mut fill = CacheFill {
            cache: Self::with_capacity(
                config.shape_cache_capacity,
                cell_size_deg,
                config.max_records_per_lookup,
            ),
            interned: HashMap::new(),
            trim_to: config.shape_cache_trim_to,
        };

        let stats = loader.stream_shape_points(path, config.max_records_per_build, &mut fill)?;
        let mut cache = fill.cache;
        cache.load_stats = stats;

        log::info!(
            "Cached {} shape points from {} shapes in {} cells ({} cells evicted)",
            cache.point_count(),
            cache.shape_ids.len(),
            cache.cells.len(),
            cache.cells.evicted()
        );

        Ok(cache)
    }

    /// Builds a cache from in-memory points.
    #[must_use]
    pub fn from_points(
        points: impl IntoIterator<Item = ShapePoint>,
        capacity: usize,
        cell_size_deg: f64,
    ) -> Self {
        let mut fill = CacheFill {
            cache: Self::with_capacity(capacity, cell_size_deg, u64::MAX),
            interned: HashMap::new(),
            trim_to: capacity,
        };
        for point in points {
            fill.on_point(point);
        }
        fill.cache
    }

    fn with_capacity(capacity: usize, cell_size_deg: f64, max_points_per_lookup: u64) -> Self {
        Self {
            cells: BoundedCache::new(capacity),
            shape_ids: Vec::new(),
            cell_size_deg,
            max_points_per_lookup,
            load_stats: ShapeStreamStats::default(),
        }
    }

    /// Number of cached points.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.cells.iter().map(|(_, points)| points.len()).sum()
    }

    /// Number of cached cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cells evicted while loading.
    #[must_use]
    pub const fn evicted_cells(&self) -> u64 {
        self.cells.evicted()
    }

    /// Counters from the load pass.
    #[must_use]
    pub const fn load_stats(&self) -> &ShapeStreamStats {
        &self.load_stats
    }
}

impl ShapeSource for RegionalShapeCache {
    fn shapes_within(
        &self,
        target: Coordinates,
        radius_m: f64,
    ) -> Result<BTreeSet<String>, GtfsError> {
        let bbox = BoundingBox::around(&target, radius_m);
        let mut found = BTreeSet::new();
        let mut inspected = 0u64;

        'cells: for cell in GridCell::covering(&bbox, self.cell_size_deg) {
            let Some(points) = self.cells.peek(&cell) else {
                continue;
            };
            for point in points {
                if inspected >= self.max_points_per_lookup {
                    log::debug!(
                        "Point cap of {} reached in cached scan",
                        self.max_points_per_lookup
                    );
                    break 'cells;
                }
                inspected += 1;
                if target.distance_m(&point.coordinates) <= radius_m
                    && let Some(id) = self.shape_ids.get(point.shape as usize)
                {
                    found.insert(id.clone());
                }
            }
        }

        Ok(found)
    }
}

struct CacheFill {
    cache: RegionalShapeCache,
    interned: HashMap<String, u32>,
    trim_to: usize,
}

impl ShapePointSink for CacheFill {
    fn on_point(&mut self, point: ShapePoint) -> Flow {
        let shape = match self.interned.get(&point.shape_id) {
            Some(&id) => id,
            None => {
                let Ok(id) = u32::try_from(self.cache.shape_ids.len()) else {
                    return Flow::Stop;
                };
                self.cache.shape_ids.push(point.shape_id.clone());
                self.interned.insert(point.shape_id, id);
                id
            }
        };

        let cell = GridCell::containing(&point.coordinates, self.cache.cell_size_deg);
        self.cache
            .cells
            .get_or_insert_with(cell, Vec::new)
            .push(CachedPoint {
                shape,
                coordinates: point.coordinates,
            });
        Flow::Continue
    }

    fn relieve_memory_pressure(&mut self) -> usize {
        let removed = self.cache.cells.trim_to(self.trim_to);
        for (_, points) in self.cache.cells.iter_mut() {
            points.shrink_to_fit();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use incident_hub_gtfs_models::LoaderConfig;

    use super::*;
    use crate::index::tests::{test_loader, write_tables};
    use crate::memory::tests::FakeProbe;

    const SHAPES: &str = "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
        shp_a,54.9754,-1.6135,1\n\
        shp_a,54.9760,-1.6120,2\n\
        shp_q,54.9745,-1.6150,1\n\
        shp_c,54.9900,-1.5500,1\n\
        shp_far,51.5074,-0.1278,1\n";

    fn point(shape: &str, lat: f64, lon: f64) -> ShapePoint {
        ShapePoint {
            shape_id: shape.into(),
            sequence: 1,
            coordinates: Coordinates::new(lat, lon).unwrap(),
        }
    }

    fn target() -> Coordinates {
        Coordinates::new(54.9754, -1.6141).unwrap()
    }

    #[test]
    fn streaming_and_cached_sources_agree() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), SHAPES);
        let loader = test_loader();

        let streaming = StreamingShapeSource::new(loader.clone(), paths.shapes.clone());
        let cached = RegionalShapeCache::load(&loader, &paths.shapes, 0.005).unwrap();

        for radius in [50.0, 100.0, 250.0, 500.0, 5_000.0] {
            assert_eq!(
                streaming.shapes_within(target(), radius).unwrap(),
                cached.shapes_within(target(), radius).unwrap(),
                "radius {radius}"
            );
        }
        let near: Vec<_> = cached.shapes_within(target(), 150.0).unwrap().into_iter().collect();
        assert_eq!(near, vec!["shp_a", "shp_q"]);
    }

    #[test]
    fn out_of_region_points_are_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), SHAPES);
        let cache = RegionalShapeCache::load(&test_loader(), &paths.shapes, 0.005).unwrap();
        assert_eq!(cache.point_count(), 4);
        assert_eq!(cache.load_stats().points_outside_region, 1);
    }

    #[test]
    fn missing_shapes_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = StreamingShapeSource::new(test_loader(), dir.path().join("shapes.txt"));
        assert!(source.shapes_within(target(), 100.0).is_err());
    }

    #[test]
    fn lookup_cap_bounds_streaming_scan() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), SHAPES);
        let loader = GeoStreamLoader::new(LoaderConfig {
            max_records_per_lookup: 1,
            ..LoaderConfig::default()
        })
        .with_probe(FakeProbe::reporting(0));
        let source = StreamingShapeSource::new(loader, paths.shapes);
        let found: Vec<_> = source.shapes_within(target(), 500.0).unwrap().into_iter().collect();
        assert_eq!(found, vec!["shp_a"]);
    }

    #[test]
    fn overflowing_cache_evicts_cells() {
        let points = vec![
            point("a", 54.9754, -1.6141),
            point("b", 54.9954, -1.5141),
            point("c", 55.0154, -1.4141),
        ];
        let cache = RegionalShapeCache::from_points(points, 2, 0.005);
        assert_eq!(cache.cell_count(), 2);
        assert_eq!(cache.evicted_cells(), 1);
        assert!(cache.shapes_within(target(), 100.0).unwrap().is_empty());
    }

    #[test]
    fn memory_pressure_trims_cache_during_load() {
        let mut shapes = String::from("shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n");
        for i in 0..40 {
            shapes.push_str(&format!("s{i},{:.4},-1.6000,1\n", 54.90 + f64::from(i) * 0.006));
        }
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), &shapes);
        let loader = GeoStreamLoader::new(LoaderConfig {
            memory_check_interval: 10,
            max_memory_mb: 1,
            shape_cache_capacity: 100,
            shape_cache_trim_to: 3,
            ..LoaderConfig::default()
        })
        .with_probe(FakeProbe::reporting(64 * 1024 * 1024));

        let cache = RegionalShapeCache::load(&loader, &paths.shapes, 0.005).unwrap();
        let stats = cache.load_stats();
        assert_eq!(stats.stream.pressure_events, 4);
        assert!(stats.stream.entries_evicted > 0);
        assert!(cache.cell_count() <= 3, "{} cells left", cache.cell_count());
    }
}
