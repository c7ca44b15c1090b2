//! Subcommand implementations. Each one prints a JSON document to stdout.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use incident_hub_cli_utils::{FileStepsProgress, IndicatifProgress, MultiProgress};
use incident_hub_dedup::DuplicateDetectionEngine;
use incident_hub_gtfs::{
    AttributionStats, GeoStreamLoader, GtfsIndex, GtfsPaths, IndexStats, IndexStatus,
    RegionalShapeCache, RouteMatcher, ShapeSource, SharedGtfsIndex, StreamingShapeSource,
    attribute_routes,
};
use incident_hub_incident_models::{DedupResult, IncidentBatch, parse_incidents};
use serde::Serialize;
use serde_json::Value;

use crate::config::HubConfig;

/// Counters from decoding the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputReport {
    /// Incidents decoded.
    pub decoded: usize,
    /// Entries dropped because they were not objects.
    pub skipped: usize,
    /// Incidents given a positional id.
    pub defaulted_ids: usize,
}

impl From<&IncidentBatch> for InputReport {
    fn from(batch: &IncidentBatch) -> Self {
        Self {
            decoded: batch.incidents.len(),
            skipped: batch.skipped,
            defaulted_ids: batch.defaulted_ids,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DedupReport {
    input: InputReport,
    #[serde(flatten)]
    result: DedupResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexReport<'a> {
    status: &'a IndexStatus,
    stats: &'a IndexStats,
    routes: usize,
    shapes: usize,
}

/// Output of the `process` subcommand.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    /// Input decoding counters.
    pub input: InputReport,
    /// Deduplication output with routes attributed on `deduplicated`.
    #[serde(flatten)]
    pub result: DedupResult,
    /// Route attribution counters.
    pub attribution: AttributionStats,
}

/// Reads incidents from a JSON file, or stdin when `path` is `-`.
///
/// Accepts a bare array or an object with an `incidents` array.
///
/// # Errors
///
/// Returns an error if the input cannot be read, is not JSON, or holds no
/// incident array.
pub fn read_incidents(path: &Path) -> Result<IncidentBatch, Box<dyn std::error::Error>> {
    let contents = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?
    };
    let batch = parse_incidents(incident_array(serde_json::from_str(&contents)?)?);
    log::info!(
        "Read {} incidents from {} ({} skipped, {} without id)",
        batch.incidents.len(),
        path.display(),
        batch.skipped,
        batch.defaulted_ids
    );
    Ok(batch)
}

fn incident_array(value: Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("incidents") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err("Expected an \"incidents\" array".to_string()),
        },
        _ => Err("Expected a JSON array of incidents".to_string()),
    }
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `dedup <input>`
///
/// # Errors
///
/// Returns an error if the input cannot be read or the output serialized.
pub fn dedup(config: &HubConfig, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let batch = read_incidents(input)?;
    let engine = DuplicateDetectionEngine::new(config.dedup.clone());
    let result = engine.process_incidents(&batch.incidents);
    print_json(&DedupReport {
        input: InputReport::from(&batch),
        result,
    })
}

/// `index`
///
/// # Errors
///
/// Returns an error if the output cannot be serialized. Build failures are
/// reported in the status field.
pub fn index(config: &HubConfig, multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let loader = GeoStreamLoader::new(config.loader.clone());
    let index = build_index(&loader, &GtfsPaths::from(&config.gtfs), multi);
    log::info!("Index ready in {:.1}s", start.elapsed().as_secs_f64());

    print_json(&IndexReport {
        status: index.status(),
        stats: index.stats(),
        routes: index.route_count(),
        shapes: index.shape_count(),
    })
}

/// `routes --lat --lon [--text]`
///
/// # Errors
///
/// Returns an error if the output cannot be serialized.
pub fn routes(
    config: &HubConfig,
    multi: &MultiProgress,
    lat: f64,
    lon: f64,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let matcher = build_matcher(config, multi);
    print_json(&matcher.find_routes(lat, lon, text))
}

/// `process <input>`: deduplicate, then attribute routes to the survivors.
///
/// # Errors
///
/// Returns an error if the input cannot be read or the output serialized.
pub fn process(
    config: &HubConfig,
    multi: &MultiProgress,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let batch = read_incidents(input)?;
    let engine = DuplicateDetectionEngine::new(config.dedup.clone());
    let matcher = build_matcher(config, multi);
    print_json(&process_batch(&engine, &matcher, &batch))
}

/// Deduplicates `batch` and fills in routes on the deduplicated records.
#[must_use]
pub fn process_batch(
    engine: &DuplicateDetectionEngine,
    matcher: &RouteMatcher,
    batch: &IncidentBatch,
) -> ProcessReport {
    let mut result = engine.process_incidents(&batch.incidents);
    let attribution = attribute_routes(matcher, &mut result.deduplicated);

    for merged in &mut result.merged_incidents {
        if let Some(updated) = result
            .deduplicated
            .iter()
            .find(|i| i.id == merged.incident.id)
        {
            merged.incident.affects_routes.clone_from(&updated.affects_routes);
        }
    }

    ProcessReport {
        input: InputReport::from(batch),
        result,
        attribution,
    }
}

/// Builds the route index with one byte bar per table under a steps bar.
fn build_index(loader: &GeoStreamLoader, paths: &GtfsPaths, multi: &MultiProgress) -> GtfsIndex {
    let progress = Arc::new(FileStepsProgress::new(multi, "Building route index", 2));
    GtfsIndex::build(&loader.clone().with_progress(progress), paths)
}

/// Builds the index and shape source named by `config`. A regional cache
/// that fails to load falls back to streaming.
fn build_matcher(config: &HubConfig, multi: &MultiProgress) -> RouteMatcher {
    let loader = GeoStreamLoader::new(config.loader.clone());
    let paths = GtfsPaths::from(&config.gtfs);
    let index = Arc::new(SharedGtfsIndex::new(build_index(&loader, &paths, multi)));

    let streaming = || -> Arc<dyn ShapeSource> {
        Arc::new(StreamingShapeSource::new(loader.clone(), paths.shapes.clone()))
    };
    let source: Arc<dyn ShapeSource> = if config.matcher.use_regional_cache {
        let progress = IndicatifProgress::bytes_bar(multi, "Caching shapes");
        match RegionalShapeCache::load(
            &loader.clone().with_progress(progress),
            &paths.shapes,
            config.matcher.cell_size_deg,
        ) {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                log::warn!("Shape cache unavailable, streaming shapes per lookup: {e}");
                streaming()
            }
        }
    } else {
        streaming()
    };

    RouteMatcher::new(index, source, config.matcher.clone())
}
