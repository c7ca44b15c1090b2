//! Chunked, memory-bounded CSV streaming.
//!
//! [`GeoStreamLoader`] reads a file in fixed-size byte chunks and keeps only
//! the trailing partial line between reads, so memory stays proportional to
//! the chunk size plus one line regardless of file size. Complete lines are
//! decoded with `csv` and handed to a [`RecordSink`] one record at a time;
//! the next chunk is only read once every record of the current one has
//! been dispatched. A line that grows past [`MAX_LINE_BYTES`] without
//! ending, including one opened by an unclosed quote, is dropped and counted
//! as malformed so the buffer stays bounded.
//!
//! Every `memory_check_interval` records the loader samples resident memory
//! and, above the ceiling, asks the sink to shrink whatever caches it feeds.
//! A per-call record cap bounds worst-case latency. Hitting it truncates the
//! stream, which is a recall limit and not an error.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;
use incident_hub_gtfs_models::{LoaderConfig, ShapePoint};
use incident_hub_spatial::{BoundingBox, Coordinates};

use crate::GtfsError;
use crate::memory::{MemoryGuard, MemoryProbe, MemoryState, ProcessMemoryProbe};
use crate::progress::{ProgressCallback, null_progress};

/// Longest line the loader will buffer while looking for its end. Longer
/// lines are skipped and counted as malformed.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const UTF8_BOM: char = '\u{feff}';

/// Whether a sink wants more records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep streaming.
    Continue,
    /// Stop reading; the rest of the file is skipped.
    Stop,
}

/// Column names of a streamed file.
#[derive(Debug, Clone)]
pub struct CsvHeader {
    path: String,
    columns: Vec<String>,
}

impl CsvHeader {
    fn from_record(path: &str, record: &StringRecord) -> Self {
        Self {
            path: path.to_string(),
            columns: record
                .iter()
                .map(|c| c.trim_start_matches(UTF8_BOM).trim().to_string())
                .collect(),
        }
    }

    /// Position of `name`, if present.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of `name`.
    ///
    /// # Errors
    ///
    /// * [`GtfsError::MissingColumn`] if the header has no such column
    pub fn require(&self, name: &'static str) -> Result<usize, GtfsError> {
        self.column(name).ok_or_else(|| GtfsError::MissingColumn {
            path: self.path.clone(),
            column: name,
        })
    }

    /// Column names in file order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Non-empty, trimmed field at `index`.
#[must_use]
pub fn field(record: &StringRecord, index: usize) -> Option<&str> {
    record.get(index).map(str::trim).filter(|s| !s.is_empty())
}

/// Receives the header and records of one streamed file.
pub trait RecordSink {
    /// Called once with the header line.
    ///
    /// # Errors
    ///
    /// Returning an error aborts the stream, e.g. when a required column is
    /// missing.
    fn on_header(&mut self, header: &CsvHeader) -> Result<(), GtfsError>;

    /// Called for every data record.
    fn on_record(&mut self, record: &StringRecord) -> Flow;

    /// Called when resident memory is above the ceiling. Returns the number
    /// of cache entries released.
    fn relieve_memory_pressure(&mut self) -> usize {
        0
    }
}

/// Counters from one streamed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Bytes read from the source.
    pub bytes_read: u64,
    /// Data records handed to the sink.
    pub records_read: u64,
    /// Lines `csv` could not decode, plus over-long lines that were skipped.
    pub records_malformed: u64,
    /// Whether the record cap cut the stream short.
    pub truncated: bool,
    /// Whether the sink asked to stop.
    pub stopped_early: bool,
    /// Memory samples taken.
    pub memory_checks: u64,
    /// Samples above the ceiling.
    pub pressure_events: u64,
    /// Cache entries released under pressure.
    pub entries_evicted: u64,
    /// Largest carry-over plus chunk buffer held at once.
    pub peak_buffer_bytes: usize,
}

/// Receives shape points that fall inside the service region.
pub trait ShapePointSink {
    /// Called for every in-region point.
    fn on_point(&mut self, point: ShapePoint) -> Flow;

    /// See [`RecordSink::relieve_memory_pressure`].
    fn relieve_memory_pressure(&mut self) -> usize {
        0
    }
}

/// Counters from one streamed shapes file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeStreamStats {
    /// Underlying stream counters.
    pub stream: StreamStats,
    /// Points handed to the sink.
    pub points_emitted: u64,
    /// Points discarded for falling outside the service region.
    pub points_outside_region: u64,
    /// Rows with a missing or unparseable field.
    pub points_malformed: u64,
}

/// Streams CSV files under the limits of a [`LoaderConfig`].
#[derive(Clone)]
pub struct GeoStreamLoader {
    config: LoaderConfig,
    probe: Arc<dyn MemoryProbe>,
    progress: Arc<dyn ProgressCallback>,
}

impl std::fmt::Debug for GeoStreamLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoStreamLoader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GeoStreamLoader {
    /// Creates a loader that samples the real process memory.
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            probe: Arc::new(ProcessMemoryProbe::new()),
            progress: null_progress(),
        }
    }

    /// Replaces the memory probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Reports bytes read to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// The limits in use.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Streams the file at `path`, inspecting at most `record_cap` records.
    ///
    /// # Errors
    ///
    /// * [`GtfsError::Io`] if the file cannot be opened or read
    /// * [`GtfsError::EmptyFile`] if there is no header line
    /// * whatever [`RecordSink::on_header`] returns
    pub fn stream_file(
        &self,
        path: &Path,
        record_cap: u64,
        sink: &mut dyn RecordSink,
    ) -> Result<StreamStats, GtfsError> {
        let label = path.display().to_string();
        let file = File::open(path).map_err(|e| GtfsError::Io {
            path: label.clone(),
            source: e,
        })?;
        if let Ok(metadata) = file.metadata() {
            self.progress.set_total(metadata.len());
        }
        self.progress.set_message(format!("Reading {label}"));

        let stats = self.stream_reader(file, &label, record_cap, sink)?;

        self.progress
            .finish(format!("Read {} records from {label}", stats.records_read));
        Ok(stats)
    }

    /// Streams any reader. `label` names the source in errors and logs.
    ///
    /// # Errors
    ///
    /// See [`Self::stream_file`].
    pub fn stream_reader(
        &self,
        mut reader: impl Read,
        label: &str,
        record_cap: u64,
        sink: &mut dyn RecordSink,
    ) -> Result<StreamStats, GtfsError> {
        let chunk_size = self.config.chunk_size_bytes.max(1);
        let mut chunk = vec![0u8; chunk_size];
        let mut carry: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut state = StreamState {
            label,
            header: None,
            record_cap,
            guard: MemoryGuard::new(self.probe.clone(), &self.config),
            stats: StreamStats::default(),
        };

        let mut scanner = RecordScanner::default();
        let mut skipping = false;

        loop {
            let n = reader.read(&mut chunk).map_err(|e| GtfsError::Io {
                path: label.to_string(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            state.stats.bytes_read += n as u64;
            self.progress.inc(n as u64);

            carry.extend_from_slice(&chunk[..n]);
            state.stats.peak_buffer_bytes = state.stats.peak_buffer_bytes.max(carry.len());

            if skipping {
                let Some(end) = carry.iter().position(|&b| b == b'\n') else {
                    carry.clear();
                    continue;
                };
                carry.drain(..=end);
                skipping = false;
            }

            scanner.scan(&carry);
            if let Some(boundary) = scanner.boundary {
                let flow = state.feed(&carry[..=boundary], sink)?;
                carry.drain(..=boundary);
                scanner.consumed(boundary + 1);
                if flow == Flow::Stop {
                    return state.finish();
                }
            }

            if carry.len() > MAX_LINE_BYTES {
                state.stats.records_malformed += 1;
                if let Some(end) = scanner.quoted_newline {
                    log::debug!("Unclosed quote in {label} ran past {MAX_LINE_BYTES} bytes");
                    carry.drain(..=end);
                } else {
                    log::debug!("Line in {label} exceeds {MAX_LINE_BYTES} bytes; skipping it");
                    carry.clear();
                    skipping = true;
                }
                scanner = RecordScanner::default();
            }
        }

        if !carry.is_empty() && !skipping {
            state.feed(&carry, sink)?;
        }

        state.finish()
    }

    /// Streams a shapes table, handing in-region points to `sink`.
    ///
    /// Points outside the configured service region are dropped before they
    /// reach the sink.
    ///
    /// # Errors
    ///
    /// See [`Self::stream_file`]; also fails if a shapes column is missing.
    pub fn stream_shape_points(
        &self,
        path: &Path,
        record_cap: u64,
        sink: &mut dyn ShapePointSink,
    ) -> Result<ShapeStreamStats, GtfsError> {
        let mut rows = ShapeRows {
            columns: None,
            region: self.config.service_region,
            sink,
            stats: ShapeStreamStats::default(),
        };
        let stream = self.stream_file(path, record_cap, &mut rows)?;
        let mut stats = rows.stats;
        stats.stream = stream;

        if stats.points_malformed > 0 {
            log::info!(
                "Skipped {} malformed shape rows in {}",
                stats.points_malformed,
                path.display()
            );
        }
        log::debug!(
            "Streamed {} shape points from {} ({} outside service region)",
            stats.points_emitted,
            path.display(),
            stats.points_outside_region
        );

        Ok(stats)
    }
}

/// Where the scanner sits relative to CSV quoting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Quoting {
    #[default]
    FieldStart,
    Unquoted,
    Quoted,
    /// A `"` inside a quoted field: either the closing quote or the first
    /// half of an escaped `""`.
    QuoteInQuoted,
}

/// Finds record boundaries in the carry buffer without rescanning bytes it
/// has already seen.
///
/// Quoting follows the `csv` reader: a `"` opens a quoted field only at the
/// start of a field. Elsewhere it is a literal character.
#[derive(Debug, Default)]
struct RecordScanner {
    quoting: Quoting,
    scanned: usize,
    /// Last newline outside quotes.
    boundary: Option<usize>,
    /// First newline inside an open quote after `boundary`.
    quoted_newline: Option<usize>,
}

impl RecordScanner {
    fn scan(&mut self, buf: &[u8]) {
        for (i, &b) in buf.iter().enumerate().skip(self.scanned) {
            self.quoting = match (self.quoting, b) {
                (Quoting::Quoted, b'"') => Quoting::QuoteInQuoted,
                (Quoting::Quoted, b'\n') => {
                    if self.quoted_newline.is_none() {
                        self.quoted_newline = Some(i);
                    }
                    Quoting::Quoted
                }
                (Quoting::Quoted, _) | (Quoting::FieldStart | Quoting::QuoteInQuoted, b'"') => {
                    Quoting::Quoted
                }
                (_, b',') | (Quoting::FieldStart, b'\r') => Quoting::FieldStart,
                (_, b'\n') => {
                    self.boundary = Some(i);
                    self.quoted_newline = None;
                    Quoting::FieldStart
                }
                _ => Quoting::Unquoted,
            };
        }
        self.scanned = buf.len();
    }

    /// Shifts positions after the first `n` bytes, which must end at
    /// `boundary`, were removed from the buffer.
    fn consumed(&mut self, n: usize) {
        self.scanned -= n;
        self.boundary = None;
        self.quoted_newline = self.quoted_newline.and_then(|i| i.checked_sub(n));
    }
}

struct StreamState<'a> {
    label: &'a str,
    header: Option<CsvHeader>,
    record_cap: u64,
    guard: MemoryGuard,
    stats: StreamStats,
}

impl StreamState<'_> {
    /// Decodes a block of complete lines and dispatches its records.
    fn feed(&mut self, block: &[u8], sink: &mut dyn RecordSink) -> Result<Flow, GtfsError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(block);

        for result in reader.records() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("Skipping malformed line in {}: {e}", self.label);
                    self.stats.records_malformed += 1;
                    continue;
                }
            };

            if self.header.is_none() {
                let header = CsvHeader::from_record(self.label, &record);
                sink.on_header(&header)?;
                self.header = Some(header);
                continue;
            }

            if self.stats.records_read >= self.record_cap {
                self.stats.truncated = true;
                log::info!(
                    "Record cap of {} reached in {}; remaining rows not inspected",
                    self.record_cap,
                    self.label
                );
                return Ok(Flow::Stop);
            }

            self.stats.records_read += 1;
            if sink.on_record(&record) == Flow::Stop {
                self.stats.stopped_early = true;
                return Ok(Flow::Stop);
            }

            if let MemoryState::OverCeiling { resident_bytes } = self.guard.record() {
                let released = sink.relieve_memory_pressure();
                self.stats.entries_evicted += released as u64;
                log::warn!(
                    "Resident memory {} MB above ceiling of {} MB while reading {}; released {released} cache entries",
                    resident_bytes / (1024 * 1024),
                    self.guard.ceiling_bytes() / (1024 * 1024),
                    self.label
                );
            }
        }

        Ok(Flow::Continue)
    }

    fn finish(mut self) -> Result<StreamStats, GtfsError> {
        if self.header.is_none() {
            return Err(GtfsError::EmptyFile(self.label.to_string()));
        }
        self.stats.memory_checks = self.guard.checks();
        self.stats.pressure_events = self.guard.pressure_events();
        if self.stats.records_malformed > 0 {
            log::info!(
                "Skipped {} malformed lines in {}",
                self.stats.records_malformed,
                self.label
            );
        }
        Ok(self.stats)
    }
}

struct ShapeColumns {
    shape_id: usize,
    sequence: usize,
    lat: usize,
    lon: usize,
}

struct ShapeRows<'a> {
    columns: Option<ShapeColumns>,
    region: BoundingBox,
    sink: &'a mut dyn ShapePointSink,
    stats: ShapeStreamStats,
}

impl ShapeRows<'_> {
    fn parse(&self, record: &StringRecord) -> Option<ShapePoint> {
        let columns = self.columns.as_ref()?;
        let shape_id = field(record, columns.shape_id)?;
        let sequence = field(record, columns.sequence)?.parse().ok()?;
        let lat = field(record, columns.lat)?.parse().ok()?;
        let lon = field(record, columns.lon)?.parse().ok()?;
        Some(ShapePoint {
            shape_id: shape_id.to_string(),
            sequence,
            coordinates: Coordinates::new(lat, lon)?,
        })
    }
}

impl RecordSink for ShapeRows<'_> {
    fn on_header(&mut self, header: &CsvHeader) -> Result<(), GtfsError> {
        self.columns = Some(ShapeColumns {
            shape_id: header.require("shape_id")?,
            sequence: header.require("shape_pt_sequence")?,
            lat: header.require("shape_pt_lat")?,
            lon: header.require("shape_pt_lon")?,
        });
        Ok(())
    }

    fn on_record(&mut self, record: &StringRecord) -> Flow {
        let Some(point) = self.parse(record) else {
            self.stats.points_malformed += 1;
            return Flow::Continue;
        };
        if !self.region.contains(&point.coordinates) {
            self.stats.points_outside_region += 1;
            return Flow::Continue;
        }
        self.stats.points_emitted += 1;
        self.sink.on_point(point)
    }

    fn relieve_memory_pressure(&mut self) -> usize {
        self.sink.relieve_memory_pressure()
    }
}
