//! The three duplicate predicates and their combined verdict.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use incident_hub_incident_models::{Coordinates, Incident};

use crate::DedupConfig;
use crate::text;

/// Comparison inputs extracted once per incident.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentFeatures {
    /// Valid coordinates, if any.
    pub coordinates: Option<Coordinates>,
    /// Tokens of title and description.
    pub tokens: BTreeSet<String>,
    /// Best-available timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncidentFeatures {
    /// Extracts the comparison inputs from `incident`.
    #[must_use]
    pub fn of(incident: &Incident) -> Self {
        Self {
            coordinates: incident.valid_coordinates(),
            tokens: text::tokens(&format!("{} {}", incident.title, incident.description)),
            timestamp: incident.best_timestamp(),
        }
    }
}

/// Outcome of comparing two incidents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateVerdict {
    /// Both positioned and within the distance threshold.
    pub geographic: bool,
    /// Token similarity at or above the threshold.
    pub textual: bool,
    /// Within the time window, or either side has no timestamp.
    pub temporal: bool,
    /// Great-circle distance, when both sides are positioned.
    pub distance_m: Option<f64>,
    /// Jaccard similarity of the token sets.
    pub similarity: f64,
    /// Absolute time gap in seconds, when both sides have a timestamp.
    pub time_gap_secs: Option<i64>,
}

impl DuplicateVerdict {
    /// Compares two feature sets under `config`.
    #[must_use]
    pub fn evaluate(a: &IncidentFeatures, b: &IncidentFeatures, config: &DedupConfig) -> Self {
        let distance_m = match (a.coordinates, b.coordinates) {
            (Some(a), Some(b)) => Some(a.distance_m(&b)),
            _ => None,
        };
        let similarity = text::jaccard(&a.tokens, &b.tokens);
        let time_gap_secs = match (a.timestamp, b.timestamp) {
            (Some(a), Some(b)) => Some((a - b).num_seconds().abs()),
            _ => None,
        };

        Self {
            geographic: distance_m.is_some_and(|d| d <= config.max_distance_m),
            textual: similarity >= config.min_text_similarity,
            temporal: time_gap_secs
                .is_none_or(|gap| gap <= i64::from(config.time_window_minutes) * 60),
            distance_m,
            similarity,
            time_gap_secs,
        }
    }

    /// Number of predicates that hold.
    #[must_use]
    pub fn votes(&self) -> u8 {
        u8::from(self.geographic) + u8::from(self.textual) + u8::from(self.temporal)
    }

    /// Whether enough predicates hold to call the pair duplicates.
    #[must_use]
    pub fn is_duplicate(&self, min_votes: u8) -> bool {
        self.votes() >= min_votes
    }

    /// Human-readable list of the predicates that fired.
    #[must_use]
    pub fn reason(&self) -> String {
        let mut parts = Vec::with_capacity(3);

        if self.geographic {
            let mut part = String::from("geographic");
            if let Some(d) = self.distance_m {
                let _ = write!(part, " ({d:.0} m)");
            }
            parts.push(part);
        }
        if self.textual {
            parts.push(format!("textual ({:.2})", self.similarity));
        }
        if self.temporal {
            parts.push(self.time_gap_secs.map_or_else(
                || "temporal (timestamp missing)".to_string(),
                |gap| format!("temporal ({} min)", gap / 60),
            ));
        }

        if parts.is_empty() {
            "no predicates matched".to_string()
        } else {
            parts.join(" + ")
        }
    }
}
