#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical incident record and deduplication result types.
//!
//! Upstream feed adapters hand the core plain [`Incident`] records. The
//! deduplication engine reads them without mutation and produces a
//! [`DedupResult`], which may contain derived [`MergedIncident`] records
//! carrying provenance about the reports they were built from.

pub mod lenient;
pub mod source;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
pub use incident_hub_spatial::Coordinates;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use source::{DEFAULT_RELIABILITY, IncidentSource, KnownSource, reliability_of};

/// Ordinal impact of an incident on traffic.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    /// Minor delays, no lane closures.
    #[default]
    #[strum(to_string = "LOW", serialize = "MINOR")]
    Low = 1,
    /// Lane closures or moderate delays.
    #[strum(to_string = "MEDIUM", serialize = "MODERATE")]
    Medium = 2,
    /// Carriageway closures or long delays.
    #[strum(to_string = "HIGH", serialize = "MAJOR", serialize = "SERIOUS")]
    High = 3,
    /// Network-level disruption.
    #[strum(to_string = "CRITICAL", serialize = "SEVERE")]
    Critical = 4,
}

impl Severity {
    /// Numeric rank, 1 (low) to 4 (critical).
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Creates a severity from its rank.
    #[must_use]
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Low),
            2 => Some(Self::Medium),
            3 => Some(Self::High),
            4 => Some(Self::Critical),
            _ => None,
        }
    }

    /// Parses a severity name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        trimmed.parse().ok().or_else(|| {
            trimmed
                .parse::<u8>()
                .ok()
                .and_then(Self::from_rank)
        })
    }
}

/// Optional lifecycle timestamps reported by a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncidentTimestamps {
    /// When the incident was reported to the feed.
    #[serde(deserialize_with = "lenient::timestamp")]
    pub reported: Option<DateTime<Utc>>,
    /// When the feed record was created.
    #[serde(deserialize_with = "lenient::timestamp")]
    pub created: Option<DateTime<Utc>>,
    /// When the feed record was last updated.
    #[serde(deserialize_with = "lenient::timestamp")]
    pub updated: Option<DateTime<Utc>>,
}

impl IncidentTimestamps {
    /// The best-available timestamp: `reported`, then `created`, then `updated`.
    #[must_use]
    pub fn best(&self) -> Option<DateTime<Utc>> {
        self.reported.or(self.created).or(self.updated)
    }
}

/// A traffic incident as reported by one upstream feed.
///
/// Every field defaults when missing or malformed; see [`lenient`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Incident {
    /// Feed-assigned identifier.
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    /// Feed tag (e.g. `"national_highways"`).
    #[serde(deserialize_with = "lenient::string")]
    pub source: String,
    /// Short headline.
    #[serde(deserialize_with = "lenient::string")]
    pub title: String,
    /// Free-text description.
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    /// Free-text location (road name, junction, area).
    #[serde(deserialize_with = "lenient::string")]
    pub location: String,
    /// Position in `(lat, lon)` order, when the feed supplies one.
    #[serde(deserialize_with = "lenient::coordinates")]
    pub coordinates: Option<Coordinates>,
    /// Impact on traffic.
    #[serde(deserialize_with = "lenient::severity")]
    pub severity: Severity,
    /// Lifecycle timestamps.
    pub timestamps: IncidentTimestamps,
    /// Short names of transit routes affected, sorted and unique.
    #[serde(alias = "routes", deserialize_with = "lenient::routes")]
    pub affects_routes: BTreeSet<String>,
    /// Whether this record was produced by merging several reports.
    #[serde(deserialize_with = "lenient::flag")]
    pub merged: bool,
    /// Whether this record has passed through the deduplication engine.
    #[serde(deserialize_with = "lenient::flag")]
    pub processed: bool,
}

impl Incident {
    /// Parsed source tag.
    #[must_use]
    pub fn source_kind(&self) -> IncidentSource {
        IncidentSource::parse(&self.source)
    }

    /// Reliability prior of this incident's source.
    #[must_use]
    pub fn reliability(&self) -> f64 {
        self.source_kind().reliability()
    }

    /// Best-available timestamp.
    #[must_use]
    pub fn best_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.best()
    }

    /// Coordinates, if present and valid.
    #[must_use]
    pub fn valid_coordinates(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }

    /// Title, location and description joined for keyword matching.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        [&self.title, &self.location, &self.description]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One member's contribution to a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    /// Member incident id.
    pub incident_id: String,
    /// Member source tag.
    pub source: String,
    /// Reliability prior at merge time.
    pub reliability: f64,
}

/// Where a merged record came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeProvenance {
    /// Distinct source tags, highest reliability first.
    pub sources: Vec<String>,
    /// Every member, highest reliability first.
    pub members: Vec<MemberSnapshot>,
    /// Which duplicate predicates fired between the first two members.
    pub merge_reason: String,
    /// When the merge was performed.
    pub merged_at: DateTime<Utc>,
}

/// An incident built from a group of duplicate reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedIncident {
    /// The merged record itself (`merged == true`).
    pub incident: Incident,
    /// Provenance of the merge.
    pub provenance: MergeProvenance,
}

/// A report that was absorbed into a merged record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRecord {
    /// Absorbed incident id.
    pub incident_id: String,
    /// Absorbed incident source tag.
    pub source: String,
    /// Id of the merged record it now belongs to.
    pub merged_into: String,
}

/// Per-predicate hit counters across all pair comparisons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredicateHits {
    /// Pairs within the distance threshold.
    pub geographic: u64,
    /// Pairs above the text similarity threshold.
    pub textual: u64,
    /// Pairs within the time window (including permissive-by-absence).
    pub temporal: u64,
}

/// Counters describing one deduplication call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    /// Incidents handed in.
    pub input_count: usize,
    /// Incidents returned in `deduplicated`.
    pub output_count: usize,
    /// Groups with more than one member.
    pub groups_merged: usize,
    /// Members absorbed into merges.
    pub duplicates_absorbed: usize,
    /// Pairwise comparisons performed.
    pub comparisons: u64,
    /// Predicate hit counters.
    pub predicate_hits: PredicateHits,
    /// Incidents without usable coordinates.
    pub missing_coordinates: usize,
    /// Incidents without any timestamp.
    pub missing_timestamps: usize,
    /// Wall-clock time spent.
    pub elapsed_ms: u64,
}

/// Output of a deduplication call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupResult {
    /// One record per group: merged records and processed singletons.
    pub deduplicated: Vec<Incident>,
    /// Every non-primary member absorbed into a merge.
    pub duplicates_found: Vec<DuplicateRecord>,
    /// Merged records with provenance.
    pub merged_incidents: Vec<MergedIncident>,
    /// Counters.
    pub stats: DedupStats,
}

/// Incidents decoded from a JSON batch plus what had to be dropped.
#[derive(Debug, Clone, Default)]
pub struct IncidentBatch {
    /// Decoded incidents.
    pub incidents: Vec<Incident>,
    /// Entries that were not JSON objects or could not be decoded at all.
    pub skipped: usize,
    /// Incidents that arrived without an id and were given a positional one.
    pub defaulted_ids: usize,
}

/// Decodes a JSON array of incident objects, defaulting bad fields and
/// skipping entries that are not objects.
#[must_use]
pub fn parse_incidents(values: Vec<serde_json::Value>) -> IncidentBatch {
    let mut batch = IncidentBatch::default();

    for (position, value) in values.into_iter().enumerate() {
        if !value.is_object() {
            log::debug!("Skipping non-object incident entry at position {position}");
            batch.skipped += 1;
            continue;
        }

        match serde_json::from_value::<Incident>(value) {
            Ok(mut incident) => {
                if incident.id.trim().is_empty() {
                    incident.id = format!("unidentified-{position}");
                    batch.defaulted_ids += 1;
                }
                batch.incidents.push(incident);
            }
            Err(e) => {
                log::debug!("Skipping undecodable incident at position {position}: {e}");
                batch.skipped += 1;
            }
        }
    }

    if batch.skipped > 0 || batch.defaulted_ids > 0 {
        log::info!(
            "Decoded {} incidents ({} skipped, {} without ids)",
            batch.incidents.len(),
            batch.skipped,
            batch.defaulted_ids
        );
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rank_roundtrip() {
        for rank in 1..=4u8 {
            assert_eq!(Severity::from_rank(rank).unwrap().rank(), rank);
        }
        assert!(Severity::from_rank(0).is_none());
        assert!(Severity::from_rank(5).is_none());
    }

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn severity_parses_names_and_aliases() {
        assert_eq!(Severity::parse_loose("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse_loose(" Major "), Some(Severity::High));
        assert_eq!(Severity::parse_loose("3"), Some(Severity::High));
        assert_eq!(Severity::parse_loose("catastrophic"), None);
    }

    #[test]
    fn best_timestamp_follows_priority() {
        let created = lenient::parse_timestamp("2024-03-01T12:00:00Z");
        let updated = lenient::parse_timestamp("2024-03-01T13:00:00Z");
        let timestamps = IncidentTimestamps {
            reported: None,
            created,
            updated,
        };
        assert_eq!(timestamps.best(), created);
        assert_eq!(IncidentTimestamps::default().best(), None);
    }

    #[test]
    fn decodes_malformed_fields_as_defaults() {
        let value = serde_json::json!({
            "id": 42,
            "source": null,
            "title": "A1 closure",
            "coordinates": "somewhere",
            "severity": "unheard-of",
            "timestamps": {"reported": "not a date", "updated": 1709294400},
            "affectsRoutes": "21, 22 ;Q3",
            "merged": "yes"
        });
        let incident: Incident = serde_json::from_value(value).unwrap();
        assert_eq!(incident.id, "42");
        assert_eq!(incident.source, "");
        assert!(incident.coordinates.is_none());
        assert_eq!(incident.severity, Severity::Low);
        assert!(incident.timestamps.reported.is_none());
        assert!(incident.timestamps.updated.is_some());
        assert_eq!(
            incident.affects_routes.into_iter().collect::<Vec<_>>(),
            vec!["21", "22", "Q3"]
        );
        assert!(incident.merged);
    }

    #[test]
    fn parse_incidents_skips_non_objects_and_fills_ids() {
        let values = vec![
            serde_json::json!({"title": "Broken down bus"}),
            serde_json::json!("not an incident"),
            serde_json::json!({"id": "b", "title": "Flooding"}),
        ];
        let batch = parse_incidents(values);
        assert_eq!(batch.incidents.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.defaulted_ids, 1);
        assert_eq!(batch.incidents[0].id, "unidentified-0");
    }

    #[test]
    fn searchable_text_skips_empty_parts() {
        let incident = Incident {
            title: "Collision".into(),
            location: "  ".into(),
            description: "Tyne Bridge northbound".into(),
            ..Incident::default()
        };
        assert_eq!(incident.searchable_text(), "Collision Tyne Bridge northbound");
    }
}
