//! Immutable route lookup built from the route and trip tables.
//!
//! A [`GtfsIndex`] is never modified after construction. Refreshing means
//! building a new one and swapping it into a [`SharedGtfsIndex`]; readers
//! holding the previous snapshot keep using it until they drop it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use csv::StringRecord;
use incident_hub_gtfs_models::{GtfsFilesConfig, IndexStats, IndexStatus, RouteRecord, TripLink};

use crate::GtfsError;
use crate::loader::{CsvHeader, Flow, GeoStreamLoader, RecordSink, field};

/// Locations of the three static tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtfsPaths {
    /// Route table.
    pub routes: PathBuf,
    /// Trip table.
    pub trips: PathBuf,
    /// Shape table.
    pub shapes: PathBuf,
}

impl GtfsPaths {
    /// Standard file names inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            routes: dir.join("routes.txt"),
            trips: dir.join("trips.txt"),
            shapes: dir.join("shapes.txt"),
        }
    }
}

impl From<&GtfsFilesConfig> for GtfsPaths {
    fn from(config: &GtfsFilesConfig) -> Self {
        Self {
            routes: config.routes_path(),
            trips: config.trips_path(),
            shapes: config.shapes_path(),
        }
    }
}

/// Route id to short name, and shape id to the short names of every route
/// whose trips follow it.
#[derive(Debug, Clone, Default)]
pub struct GtfsIndex {
    short_names: BTreeMap<String, String>,
    shape_routes: HashMap<String, BTreeSet<String>>,
    known_short_names: BTreeSet<String>,
    status: IndexStatus,
    stats: IndexStats,
}

impl GtfsIndex {
    /// An index with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty index recording why construction failed.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: IndexStatus::Failed {
                reason: reason.into(),
            },
            ..Self::default()
        }
    }

    /// Builds an index from in-memory records.
    ///
    /// Links naming an unknown route or an empty shape are counted and
    /// skipped. A route with an empty short name is listed under its id.
    #[must_use]
    pub fn from_records(
        routes: impl IntoIterator<Item = RouteRecord>,
        links: impl IntoIterator<Item = TripLink>,
    ) -> Self {
        let mut builder = IndexBuilder::default();
        for route in routes {
            builder.add_route(route);
        }
        for link in links {
            builder.stats.trip_rows_read += 1;
            builder.add_link(link);
        }
        builder.finish()
    }

    /// Builds from the route and trip tables, degrading to a failed empty
    /// index instead of returning an error.
    #[must_use]
    pub fn build(loader: &GeoStreamLoader, paths: &GtfsPaths) -> Self {
        match Self::try_build(loader, paths) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Route index build failed, continuing with an empty index: {e}");
                Self::failed(e.to_string())
            }
        }
    }

    /// Builds from the route and trip tables.
    ///
    /// # Errors
    ///
    /// * [`GtfsError::Io`] if a table cannot be read
    /// * [`GtfsError::MissingColumn`] if a table lacks a required column
    /// * [`GtfsError::EmptyFile`] if a table has no header
    pub fn try_build(loader: &GeoStreamLoader, paths: &GtfsPaths) -> Result<Self, GtfsError> {
        let start = Instant::now();
        let cap = loader.config().max_records_per_build;
        log::info!(
            "Building route index from {} and {}",
            paths.routes.display(),
            paths.trips.display()
        );

        let mut builder = IndexBuilder::default();

        let mut routes = RouteRows {
            builder: &mut builder,
            route_id: 0,
            short_name: None,
        };
        let route_stream = loader.stream_file(&paths.routes, cap, &mut routes)?;

        let mut trips = TripRows {
            builder: &mut builder,
            route_id: 0,
            shape_id: 0,
        };
        let trip_stream = loader.stream_file(&paths.trips, cap, &mut trips)?;

        builder.stats.rows_skipped +=
            route_stream.records_malformed + trip_stream.records_malformed;
        builder.stats.truncated = route_stream.truncated || trip_stream.truncated;

        let mut index = builder.finish();
        index.stats.build_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::info!(
            "Route index built: {} routes, {} shapes, {} links from {} trip rows ({} skipped, {} unknown routes) in {}ms",
            index.stats.routes_loaded,
            index.stats.shapes_indexed,
            index.stats.trip_links_kept,
            index.stats.trip_rows_read,
            index.stats.rows_skipped,
            index.stats.unknown_route_rows,
            index.stats.build_ms
        );

        Ok(index)
    }

    /// Health of this snapshot.
    #[must_use]
    pub const fn status(&self) -> &IndexStatus {
        &self.status
    }

    /// Counters from construction.
    #[must_use]
    pub const fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Whether geometry lookups can succeed.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Short name of `route_id`.
    #[must_use]
    pub fn route_short_name(&self, route_id: &str) -> Option<&str> {
        self.short_names.get(route_id).map(String::as_str)
    }

    /// Short names of the routes following `shape_id`.
    #[must_use]
    pub fn routes_for_shape(&self, shape_id: &str) -> Option<&BTreeSet<String>> {
        self.shape_routes.get(shape_id)
    }

    /// Sorted union of the routes following any of `shape_ids`.
    #[must_use]
    pub fn routes_for_shapes<'a>(
        &self,
        shape_ids: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        shape_ids
            .into_iter()
            .filter_map(|id| self.shape_routes.get(id))
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether some route uses `short_name`.
    #[must_use]
    pub fn knows_route(&self, short_name: &str) -> bool {
        self.known_short_names.contains(short_name)
    }

    /// Whether `shape_id` maps to any route.
    #[must_use]
    pub fn has_shape(&self, shape_id: &str) -> bool {
        self.shape_routes.contains_key(shape_id)
    }

    /// Number of routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.short_names.len()
    }

    /// Number of mapped shapes.
    #[must_use]
    pub fn shape_count(&self) -> usize {
        self.shape_routes.len()
    }
}

#[derive(Default)]
struct IndexBuilder {
    short_names: BTreeMap<String, String>,
    shape_routes: HashMap<String, BTreeSet<String>>,
    links: HashSet<TripLink>,
    stats: IndexStats,
}

impl IndexBuilder {
    fn add_route(&mut self, route: RouteRecord) {
        let route_id = route.route_id.trim();
        if route_id.is_empty() {
            self.stats.rows_skipped += 1;
            return;
        }
        let short_name = match route.short_name.trim() {
            "" => route_id.to_string(),
            name => name.to_string(),
        };
        self.short_names.insert(route_id.to_string(), short_name);
    }

    fn add_link(&mut self, link: TripLink) {
        let route_id = link.route_id.trim();
        let shape_id = link.shape_id.trim();
        if route_id.is_empty() || shape_id.is_empty() {
            self.stats.rows_skipped += 1;
            return;
        }
        let Some(short_name) = self.short_names.get(route_id) else {
            self.stats.unknown_route_rows += 1;
            return;
        };

        let link = TripLink {
            route_id: route_id.to_string(),
            shape_id: shape_id.to_string(),
        };
        if self.links.contains(&link) {
            return;
        }
        self.shape_routes
            .entry(link.shape_id.clone())
            .or_default()
            .insert(short_name.clone());
        self.links.insert(link);
    }

    fn finish(mut self) -> GtfsIndex {
        self.stats.routes_loaded = self.short_names.len();
        self.stats.trip_links_kept = self.links.len();
        self.stats.shapes_indexed = self.shape_routes.len();

        let status = if self.shape_routes.is_empty() {
            IndexStatus::Empty
        } else {
            IndexStatus::Ready
        };

        GtfsIndex {
            known_short_names: self.short_names.values().cloned().collect(),
            short_names: self.short_names,
            shape_routes: self.shape_routes,
            status,
            stats: self.stats,
        }
    }
}

struct RouteRows<'a> {
    builder: &'a mut IndexBuilder,
    route_id: usize,
    short_name: Option<usize>,
}

impl RecordSink for RouteRows<'_> {
    fn on_header(&mut self, header: &CsvHeader) -> Result<(), GtfsError> {
        self.route_id = header.require("route_id")?;
        self.short_name = header.column("route_short_name");
        Ok(())
    }

    fn on_record(&mut self, record: &StringRecord) -> Flow {
        let Some(route_id) = field(record, self.route_id) else {
            self.builder.stats.rows_skipped += 1;
            return Flow::Continue;
        };
        let short_name = self
            .short_name
            .and_then(|i| field(record, i))
            .unwrap_or_default();
        self.builder.add_route(RouteRecord {
            route_id: route_id.to_string(),
            short_name: short_name.to_string(),
        });
        Flow::Continue
    }
}

struct TripRows<'a> {
    builder: &'a mut IndexBuilder,
    route_id: usize,
    shape_id: usize,
}

impl RecordSink for TripRows<'_> {
    fn on_header(&mut self, header: &CsvHeader) -> Result<(), GtfsError> {
        self.route_id = header.require("route_id")?;
        self.shape_id = header.require("shape_id")?;
        Ok(())
    }

    fn on_record(&mut self, record: &StringRecord) -> Flow {
        self.builder.stats.trip_rows_read += 1;
        self.builder.add_link(TripLink {
            route_id: field(record, self.route_id).unwrap_or_default().to_string(),
            shape_id: field(record, self.shape_id).unwrap_or_default().to_string(),
        });
        Flow::Continue
    }
}

/// A swappable handle to the current index snapshot.
#[derive(Debug, Default)]
pub struct SharedGtfsIndex {
    current: RwLock<Arc<GtfsIndex>>,
}

impl SharedGtfsIndex {
    /// Wraps an initial snapshot.
    #[must_use]
    pub fn new(index: GtfsIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// The current snapshot. It stays valid across later swaps.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GtfsIndex> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `index` and returns the snapshot it replaced.
    pub fn swap(&self, index: GtfsIndex) -> Arc<GtfsIndex> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(index))
    }

    /// Builds a new index off to the side and swaps it in.
    ///
    /// If the build fails while a ready index is in service, the ready
    /// index is kept. Returns the status of the attempted build.
    pub fn refresh(&self, loader: &GeoStreamLoader, paths: &GtfsPaths) -> IndexStatus {
        match GtfsIndex::try_build(loader, paths) {
            Ok(index) => {
                let status = index.status().clone();
                self.swap(index);
                status
            }
            Err(e) => {
                let status = IndexStatus::Failed {
                    reason: e.to_string(),
                };
                if self.snapshot().is_ready() {
                    log::warn!("Route index refresh failed, keeping previous index: {e}");
                } else {
                    log::warn!("Route index refresh failed, serving an empty index: {e}");
                    self.swap(GtfsIndex::failed(e.to_string()));
                }
                status
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use incident_hub_gtfs_models::LoaderConfig;

    use super::*;
    use crate::memory::tests::FakeProbe;

    pub const ROUTES: &str = "route_id,agency_id,route_short_name,route_long_name\n\
        r21,GNE,21,Newcastle - Durham\n\
        r22,GNE,22,Newcastle - Wideopen\n\
        rQ3,GNE,Q3,Quaylink\n\
        r1,GNE,,Coast Road shuttle\n";

    pub const TRIPS: &str = "route_id,service_id,trip_id,shape_id\n\
        r21,wk,t1,shp_a\n\
        r21,wk,t2,shp_a\n\
        r22,wk,t3,shp_a\n\
        rQ3,wk,t4,shp_q\n\
        r1,wk,t5,shp_c\n\
        r99,wk,t6,shp_z\n\
        r21,wk,t7,\n";

    pub fn write_tables(dir: &Path, shapes: &str) -> GtfsPaths {
        let paths = GtfsPaths::in_dir(dir);
        std::fs::write(&paths.routes, ROUTES).unwrap();
        std::fs::write(&paths.trips, TRIPS).unwrap();
        std::fs::write(&paths.shapes, shapes).unwrap();
        paths
    }

    pub fn test_loader() -> GeoStreamLoader {
        GeoStreamLoader::new(LoaderConfig {
            chunk_size_bytes: 32,
            ..LoaderConfig::default()
        })
        .with_probe(FakeProbe::reporting(0))
    }

    #[test]
    fn builds_shape_to_route_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), "shape_id\n");
        let index = GtfsIndex::build(&test_loader(), &paths);

        assert!(index.is_ready());
        assert_eq!(index.route_short_name("r21"), Some("21"));
        assert_eq!(index.route_short_name("r1"), Some("r1"));
        let shared: Vec<_> = index.routes_for_shape("shp_a").unwrap().iter().cloned().collect();
        assert_eq!(shared, vec!["21", "22"]);
        assert!(index.routes_for_shape("shp_z").is_none());
        assert!(index.knows_route("Q3"));

        let stats = index.stats();
        assert_eq!(stats.routes_loaded, 4);
        assert_eq!(stats.trip_rows_read, 7);
        assert_eq!(stats.trip_links_kept, 4);
        assert_eq!(stats.shapes_indexed, 3);
        assert_eq!(stats.unknown_route_rows, 1);
        assert_eq!(stats.rows_skipped, 1);
    }

    #[test]
    fn routes_for_shapes_is_sorted_union() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), "shape_id\n");
        let index = GtfsIndex::build(&test_loader(), &paths);
        let routes: Vec<_> = index
            .routes_for_shapes(["shp_q", "shp_a", "unknown"])
            .into_iter()
            .collect();
        assert_eq!(routes, vec!["21", "22", "Q3"]);
    }

    #[test]
    fn missing_file_yields_failed_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = GtfsIndex::build(&test_loader(), &GtfsPaths::in_dir(dir.path()));
        assert!(index.status().is_failed());
        assert_eq!(index.shape_count(), 0);
        assert_eq!(index.route_count(), 0);
    }

    #[test]
    fn malformed_header_yields_failed_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), "shape_id\n");
        std::fs::write(&paths.trips, "route,shape\nr21,shp_a\n").unwrap();
        let index = GtfsIndex::build(&test_loader(), &paths);
        match index.status() {
            IndexStatus::Failed { reason } => assert!(reason.contains("route_id"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn tables_without_links_are_empty_not_failed() {
        let index = GtfsIndex::from_records(
            vec![RouteRecord {
                route_id: "r1".into(),
                short_name: "1".into(),
            }],
            Vec::new(),
        );
        assert_eq!(index.status(), &IndexStatus::Empty);
        assert_eq!(index.route_count(), 1);
    }

    #[test]
    fn swap_keeps_old_snapshots_alive() {
        let shared = SharedGtfsIndex::new(GtfsIndex::empty());
        let before = shared.snapshot();
        let replacement = GtfsIndex::from_records(
            vec![RouteRecord {
                route_id: "r".into(),
                short_name: "Q3".into(),
            }],
            vec![TripLink {
                route_id: "r".into(),
                shape_id: "s".into(),
            }],
        );
        let replaced = shared.swap(replacement);
        assert!(Arc::ptr_eq(&before, &replaced));
        assert_eq!(before.shape_count(), 0);
        assert_eq!(shared.snapshot().shape_count(), 1);
    }

    #[test]
    fn failed_refresh_keeps_ready_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), "shape_id\n");
        let loader = test_loader();
        let shared = SharedGtfsIndex::default();

        assert_eq!(shared.refresh(&loader, &paths), IndexStatus::Ready);
        std::fs::remove_file(&paths.routes).unwrap();
        assert!(shared.refresh(&loader, &paths).is_failed());
        assert!(shared.snapshot().is_ready());
        assert_eq!(shared.snapshot().route_short_name("rQ3"), Some("Q3"));
    }

    #[test]
    fn failed_refresh_without_ready_index_installs_failed_index() {
        let dir = tempfile::tempdir().unwrap();
        let shared = SharedGtfsIndex::default();
        shared.refresh(&test_loader(), &GtfsPaths::in_dir(dir.path()));
        assert!(shared.snapshot().status().is_failed());
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_tables(dir.path(), "shape_id\n");
        let shared = Arc::new(SharedGtfsIndex::default());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = shared.snapshot();
                        let count = snapshot.shape_count();
                        assert!(count == 0 || count == 3, "partial index with {count} shapes");
                    }
                })
            })
            .collect();

        for _ in 0..5 {
            shared.refresh(&test_loader(), &paths);
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
