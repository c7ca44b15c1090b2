#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Transit route attribution for incidents.
//!
//! Reads static transit tables (routes, trips, shapes) with a chunked,
//! memory-bounded CSV loader and answers "which routes pass near here?".
//!
//! # Architecture
//!
//! - **Loading**: [`loader::GeoStreamLoader`] reads files in fixed-size
//!   chunks, carrying partial lines between chunks, sampling process memory
//!   every few hundred records and asking its sink to shed cached data when
//!   over the ceiling. Per-pass record caps bound work on huge feeds.
//! - **Index**: [`index::GtfsIndex`] maps shape ids to route short names.
//!   It is immutable; refreshes build a replacement and swap it into a
//!   [`index::SharedGtfsIndex`]. A failed build yields an empty index with
//!   a failed status rather than an error.
//! - **Geometry**: a [`shapes::ShapeSource`] finds shapes near a point,
//!   either by streaming the shapes table per query or from a
//!   [`shapes::RegionalShapeCache`] of grid cells.
//! - **Matching**: [`matcher::RouteMatcher`] widens through the configured
//!   radii, stops at the first radius with any route and otherwise falls
//!   back to corridor keywords in the incident text.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use incident_hub_gtfs::index::{GtfsIndex, GtfsPaths, SharedGtfsIndex};
//! use incident_hub_gtfs::loader::GeoStreamLoader;
//! use incident_hub_gtfs::matcher::RouteMatcher;
//! use incident_hub_gtfs::shapes::StreamingShapeSource;
//! use incident_hub_gtfs_models::{LoaderConfig, MatcherConfig};
//!
//! let loader = GeoStreamLoader::new(LoaderConfig::default());
//! let paths = GtfsPaths::in_dir("data/gtfs".as_ref());
//! let index = Arc::new(SharedGtfsIndex::new(GtfsIndex::build(&loader, &paths)));
//! let source = Arc::new(StreamingShapeSource::new(loader, paths.shapes));
//! let matcher = RouteMatcher::new(index, source, MatcherConfig::default());
//!
//! let result = matcher.find_routes(54.9754, -1.6141, "Tyne Bridge closed");
//! println!("{:?} ({})", result.routes, result.confidence);
//! ```

pub mod attribution;
pub mod cache;
pub mod corridors;
pub mod error;
pub mod index;
pub mod loader;
pub mod matcher;
pub mod memory;
pub mod progress;
pub mod shapes;

pub use attribution::{AttributionStats, attribute_routes};
pub use error::GtfsError;
pub use incident_hub_gtfs_models::{
    IndexStats, IndexStatus, LoaderConfig, MatchConfidence, MatchMethod, MatcherConfig,
    RouteMatchResult,
};
pub use index::{GtfsIndex, GtfsPaths, SharedGtfsIndex};
pub use loader::GeoStreamLoader;
pub use matcher::RouteMatcher;
pub use shapes::{RegionalShapeCache, ShapeSource, StreamingShapeSource};
