#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collapses overlapping incident reports from independent feeds.
//!
//! Two incidents are potential duplicates when at least two of three
//! predicates hold: they are close on the ground, their title and
//! description share most of their words, and they were reported close in
//! time. Duplicate groups are merged into one record, choosing each field
//! by the reliability of the reporting feed. See [`DuplicateDetectionEngine`].

pub mod grouping;
pub mod merge;
pub mod predicates;
pub mod text;

use std::time::Instant;

use chrono::{DateTime, Utc};
use incident_hub_incident_models::{DedupResult, DedupStats, Incident};
use serde::{Deserialize, Serialize};

use crate::grouping::IncidentGroup;
use crate::merge::merge_group;
use crate::predicates::{DuplicateVerdict, IncidentFeatures};

/// Default distance threshold, in meters.
pub const DEFAULT_MAX_DISTANCE_M: f64 = 100.0;

/// Default Jaccard similarity threshold.
pub const DEFAULT_MIN_TEXT_SIMILARITY: f64 = 0.7;

/// Default time window, in minutes.
pub const DEFAULT_TIME_WINDOW_MINUTES: u32 = 15;

/// Default number of predicates that must agree.
pub const DEFAULT_MIN_VOTES: u8 = 2;

/// Thresholds for the duplicate predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum great-circle distance for the geographic predicate.
    pub max_distance_m: f64,
    /// Minimum Jaccard similarity for the textual predicate.
    pub min_text_similarity: f64,
    /// Maximum gap between best-available timestamps.
    pub time_window_minutes: u32,
    /// Predicates that must hold for a pair to be duplicates.
    pub min_votes: u8,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_distance_m: DEFAULT_MAX_DISTANCE_M,
            min_text_similarity: DEFAULT_MIN_TEXT_SIMILARITY,
            time_window_minutes: DEFAULT_TIME_WINDOW_MINUTES,
            min_votes: DEFAULT_MIN_VOTES,
        }
    }
}

impl DedupConfig {
    /// Rejects thresholds that cannot produce meaningful verdicts.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !self.max_distance_m.is_finite() || self.max_distance_m < 0.0 {
            return Err(format!(
                "dedup.max_distance_m must be a non-negative number, got {}",
                self.max_distance_m
            ));
        }
        if !(0.0..=1.0).contains(&self.min_text_similarity) {
            return Err(format!(
                "dedup.min_text_similarity must be within [0, 1], got {}",
                self.min_text_similarity
            ));
        }
        if !(1..=3).contains(&self.min_votes) {
            return Err(format!(
                "dedup.min_votes must be 1, 2 or 3, got {}",
                self.min_votes
            ));
        }
        Ok(())
    }
}

/// Stateless duplicate detector; one instance may serve concurrent batches.
#[derive(Debug, Clone, Default)]
pub struct DuplicateDetectionEngine {
    config: DedupConfig,
}

impl DuplicateDetectionEngine {
    /// Creates an engine with the given thresholds.
    #[must_use]
    pub const fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Evaluates all three predicates for a pair.
    #[must_use]
    pub fn compare(&self, a: &Incident, b: &Incident) -> DuplicateVerdict {
        DuplicateVerdict::evaluate(&IncidentFeatures::of(a), &IncidentFeatures::of(b), &self.config)
    }

    /// Whether enough predicates hold for `a` and `b` to be duplicates.
    #[must_use]
    pub fn are_potential_duplicates(&self, a: &Incident, b: &Incident) -> bool {
        self.compare(a, b).is_duplicate(self.config.min_votes)
    }

    /// Deduplicates a batch, stamping merges with the current time.
    #[must_use]
    pub fn process_incidents(&self, incidents: &[Incident]) -> DedupResult {
        self.process_incidents_at(incidents, Utc::now())
    }

    /// Deduplicates a batch, stamping merges with `merged_at`.
    ///
    /// Every input lands in exactly one group. Groups of one are returned
    /// as a copy marked `processed`; larger groups become one merged record
    /// and their non-primary members are listed in `duplicates_found`, so
    /// `deduplicated.len() + duplicates_found.len() == incidents.len()`.
    /// Inputs are never mutated.
    #[must_use]
    pub fn process_incidents_at(
        &self,
        incidents: &[Incident],
        merged_at: DateTime<Utc>,
    ) -> DedupResult {
        let start = Instant::now();

        let features: Vec<IncidentFeatures> = incidents.iter().map(IncidentFeatures::of).collect();
        let grouping = grouping::group(&features, &self.config);

        let mut result = DedupResult {
            stats: DedupStats {
                input_count: incidents.len(),
                comparisons: grouping.comparisons,
                predicate_hits: grouping.hits,
                missing_coordinates: features.iter().filter(|f| f.coordinates.is_none()).count(),
                missing_timestamps: features.iter().filter(|f| f.timestamp.is_none()).count(),
                ..DedupStats::default()
            },
            ..DedupResult::default()
        };

        for group in &grouping.groups {
            Self::resolve_group(incidents, group, merged_at, &mut result);
        }

        result.stats.output_count = result.deduplicated.len();
        result.stats.elapsed_ms =
            u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        log::info!(
            "Deduplicated {} incidents into {} ({} groups merged, {} duplicates, {} comparisons) in {}ms",
            result.stats.input_count,
            result.stats.output_count,
            result.stats.groups_merged,
            result.stats.duplicates_absorbed,
            result.stats.comparisons,
            result.stats.elapsed_ms
        );

        result
    }

    fn resolve_group(
        incidents: &[Incident],
        group: &IncidentGroup,
        merged_at: DateTime<Utc>,
        result: &mut DedupResult,
    ) {
        if group.is_singleton() {
            let mut single = incidents[group.members[0]].clone();
            single.processed = true;
            result.deduplicated.push(single);
            return;
        }

        let members: Vec<&Incident> = group.members.iter().map(|&i| &incidents[i]).collect();
        let reason = group
            .leading_verdict()
            .map_or_else(String::new, DuplicateVerdict::reason);
        let outcome = merge_group(&members, reason, merged_at);

        log::debug!(
            "Merged {} incidents into {} ({})",
            members.len(),
            outcome.merged.incident.id,
            outcome.merged.provenance.merge_reason
        );

        result.stats.groups_merged += 1;
        result.stats.duplicates_absorbed += outcome.absorbed.len();
        result.deduplicated.push(outcome.merged.incident.clone());
        result.duplicates_found.extend(outcome.absorbed);
        result.merged_incidents.push(outcome.merged);
    }
}

#[cfg(test)]
mod tests {
    use incident_hub_incident_models::{Coordinates, lenient::parse_timestamp};

    use super::*;

    fn incident(id: &str, source: &str, lat: f64, lon: f64, title: &str, at: &str) -> Incident {
        let mut incident = Incident {
            id: id.into(),
            source: source.into(),
            title: title.into(),
            coordinates: Coordinates::new(lat, lon),
            ..Incident::default()
        };
        incident.timestamps.reported = parse_timestamp(at);
        incident
    }

    fn fixed_now() -> DateTime<Utc> {
        parse_timestamp("2024-03-01T12:30:00Z").unwrap()
    }

    #[test]
    fn close_similar_recent_pair_is_duplicate() {
        let engine = DuplicateDetectionEngine::default();
        let a = incident(
            "a",
            "tomtom",
            54.9750,
            -1.6140,
            "Tyne Bridge closed northbound",
            "2024-03-01T12:00:00Z",
        );
        let b = incident(
            "b",
            "here",
            54.97545,
            -1.6140,
            "Tyne Bridge closed northbound",
            "2024-03-01T12:03:00Z",
        );
        let verdict = engine.compare(&a, &b);
        assert_eq!(verdict.votes(), 3);
        assert!(engine.are_potential_duplicates(&a, &b));
    }

    #[test]
    fn two_feed_scenario_merges_with_sources_in_reliability_order() {
        let engine = DuplicateDetectionEngine::default();
        let a = incident("a", "feedX", 54.9750, -1.6140, "A1 closure", "2024-03-01T12:00:00Z");
        let b = incident("b", "feedY", 54.9751, -1.6141, "A1 Road Closed", "2024-03-01T12:03:00Z");

        let result = engine.process_incidents_at(&[a, b], fixed_now());
        assert_eq!(result.deduplicated.len(), 1);
        assert_eq!(result.merged_incidents.len(), 1);
        assert_eq!(result.duplicates_found.len(), 1);

        let merged = &result.merged_incidents[0];
        assert_eq!(merged.provenance.sources, vec!["feedX", "feedY"]);
        assert!(merged.incident.merged);
        assert!(merged.provenance.merge_reason.contains("geographic"));
        assert!(merged.provenance.merge_reason.contains("temporal"));
        assert_eq!(merged.provenance.merged_at, fixed_now());
        assert_eq!(result.duplicates_found[0].merged_into, merged.incident.id);
    }

    #[test]
    fn three_sources_merge_to_most_reliable_text() {
        let engine = DuplicateDetectionEngine::default();
        let mut a = incident(
            "a",
            "street_manager",
            54.9750,
            -1.6140,
            "Emergency gas works",
            "2024-03-01T12:00:00Z",
        );
        a.location = "Westgate Road".into();
        let mut b = incident(
            "b",
            "tomtom",
            54.9750,
            -1.6141,
            "Gas works causing queues",
            "2024-03-01T12:02:00Z",
        );
        b.location = "Westgate Rd near Cottenham Street".into();
        let c = incident(
            "c",
            "feedZ",
            54.9751,
            -1.6140,
            "Roadworks Westgate Road",
            "2024-03-01T12:04:00Z",
        );

        let result = engine.process_incidents_at(&[c, b, a.clone()], fixed_now());
        assert_eq!(result.deduplicated.len(), 1);
        let merged = &result.deduplicated[0];
        assert_eq!(merged.title, a.title);
        assert_eq!(merged.location, a.location);
        assert_eq!(result.stats.groups_merged, 1);
        assert_eq!(result.stats.duplicates_absorbed, 2);
    }

    #[test]
    fn counts_are_conserved() {
        let engine = DuplicateDetectionEngine::default();
        let batch = vec![
            incident("a", "nexus", 54.9750, -1.6140, "Bus diverted", "2024-03-01T12:00:00Z"),
            incident("b", "tomtom", 54.9750, -1.6140, "Queueing traffic", "2024-03-01T12:01:00Z"),
            incident("c", "here", 55.0100, -1.4400, "Broken down vehicle", "2024-03-01T12:01:00Z"),
            incident("d", "social_media", 54.9000, -1.5000, "Crash on A19", "2024-03-01T09:00:00Z"),
            Incident::default(),
        ];
        let result = engine.process_incidents_at(&batch, fixed_now());
        assert_eq!(
            result.deduplicated.len() + result.duplicates_found.len(),
            batch.len()
        );
        assert!(result.deduplicated.len() <= batch.len());
        assert_eq!(result.stats.input_count, batch.len());
        assert_eq!(result.stats.output_count, result.deduplicated.len());
        assert_eq!(result.stats.missing_coordinates, 1);
        assert_eq!(result.stats.missing_timestamps, 1);
    }

    #[test]
    fn singletons_pass_through_marked_processed() {
        let engine = DuplicateDetectionEngine::default();
        let a = incident("a", "nexus", 54.9750, -1.6140, "Metro suspended", "2024-03-01T12:00:00Z");
        let result = engine.process_incidents_at(std::slice::from_ref(&a), fixed_now());
        assert_eq!(result.deduplicated.len(), 1);
        assert!(result.deduplicated[0].processed);
        assert!(!result.deduplicated[0].merged);
        assert_eq!(result.deduplicated[0].id, "a");
        assert!(!a.processed, "input must not be mutated");
        assert!(result.merged_incidents.is_empty());
    }

    #[test]
    fn missing_timestamps_bias_toward_merging() {
        let engine = DuplicateDetectionEngine::default();
        let a = incident("a", "nexus", 54.9750, -1.6140, "Signals failure", "");
        let b = incident("b", "tomtom", 54.9750, -1.6140, "Slow traffic", "2024-03-01T12:00:00Z");
        assert!(a.best_timestamp().is_none());
        let result = engine.process_incidents_at(&[a, b], fixed_now());
        assert_eq!(result.deduplicated.len(), 1);
    }

    #[test]
    fn incidents_without_coordinates_or_text_stay_apart() {
        let engine = DuplicateDetectionEngine::default();
        let a = Incident {
            id: "a".into(),
            ..Incident::default()
        };
        let b = Incident {
            id: "b".into(),
            ..Incident::default()
        };
        // Only the permissive temporal predicate fires.
        let result = engine.process_incidents_at(&[a, b], fixed_now());
        assert_eq!(result.deduplicated.len(), 2);
        assert_eq!(result.stats.predicate_hits.temporal, 1);
    }

    #[test]
    fn merge_ids_are_reproducible() {
        let engine = DuplicateDetectionEngine::default();
        let batch = vec![
            incident("x1", "nexus", 54.9750, -1.6140, "Metro delays", "2024-03-01T12:00:00Z"),
            incident("x2", "here", 54.9750, -1.6140, "Metro delays", "2024-03-01T12:00:00Z"),
        ];
        let first = engine.process_incidents_at(&batch, fixed_now());
        let second = engine.process_incidents(&batch);
        assert_eq!(
            first.merged_incidents[0].incident.id,
            second.merged_incidents[0].incident.id
        );
    }

    #[test]
    fn config_validation_rejects_bad_thresholds() {
        assert!(DedupConfig::default().validate().is_ok());
        let bad_similarity = DedupConfig {
            min_text_similarity: 1.5,
            ..DedupConfig::default()
        };
        assert!(bad_similarity.validate().is_err());
        let bad_votes = DedupConfig {
            min_votes: 0,
            ..DedupConfig::default()
        };
        assert!(bad_votes.validate().is_err());
    }
}
