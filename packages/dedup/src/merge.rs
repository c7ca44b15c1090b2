//! Reliability-ranked merge of a duplicate group into one record.
//!
//! Members are ranked by their source's reliability prior, highest first;
//! equal priors keep batch order. Each field is then resolved on its own:
//!
//! * `title`, `location`, `description`: non-empty value from the most
//!   reliable member, longer value on equal reliability
//! * `coordinates`: most reliable member with valid coordinates
//! * `severity`: highest severity, most reliable member on ties
//! * `affects_routes`: sorted union
//! * timestamps: earliest `reported`/`created`, latest `updated`

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use incident_hub_incident_models::{
    DuplicateRecord, Incident, IncidentTimestamps, MemberSnapshot, MergeProvenance,
    MergedIncident, Severity,
};
use sha2::{Digest, Sha256};

/// Prefix of merged record ids.
pub const MERGE_ID_PREFIX: &str = "merged-";

/// Hex characters of the digest kept in merged ids.
const MERGE_ID_HEX_LEN: usize = 16;

/// A merged record and the members it absorbed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The merged record with provenance.
    pub merged: MergedIncident,
    /// Every member except the primary.
    pub absorbed: Vec<DuplicateRecord>,
}

struct Ranked<'a> {
    incident: &'a Incident,
    reliability: f64,
}

/// Deterministic id for a merged record: a digest of the sorted member ids.
#[must_use]
pub fn merge_id<'a>(member_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = member_ids.into_iter().collect();
    ids.sort_unstable();
    let digest = Sha256::digest(ids.join("\n").as_bytes());
    let hex = hex::encode(digest);
    format!("{MERGE_ID_PREFIX}{}", &hex[..MERGE_ID_HEX_LEN])
}

/// Merges `members` (group order, seed first) into one record.
///
/// `merge_reason` describes the predicates that fired between the first two
/// members.
#[must_use]
pub fn merge_group(
    members: &[&Incident],
    merge_reason: String,
    merged_at: DateTime<Utc>,
) -> MergeOutcome {
    let mut ranked: Vec<Ranked<'_>> = members
        .iter()
        .map(|&incident| Ranked {
            incident,
            reliability: incident.reliability(),
        })
        .collect();
    ranked.sort_by(|a, b| b.reliability.total_cmp(&a.reliability));

    let id = merge_id(members.iter().map(|m| m.id.as_str()));
    let primary = ranked.first().map(|r| r.incident);

    let incident = Incident {
        id: id.clone(),
        source: primary.map(|p| p.source.clone()).unwrap_or_default(),
        title: pick_text(&ranked, |i| i.title.as_str()),
        description: pick_text(&ranked, |i| i.description.as_str()),
        location: pick_text(&ranked, |i| i.location.as_str()),
        coordinates: ranked.iter().find_map(|r| r.incident.valid_coordinates()),
        severity: pick_severity(&ranked),
        timestamps: merge_timestamps(&ranked),
        affects_routes: ranked
            .iter()
            .flat_map(|r| r.incident.affects_routes.iter().cloned())
            .collect(),
        merged: true,
        processed: true,
    };

    let mut sources: Vec<String> = Vec::new();
    for r in &ranked {
        if !sources.contains(&r.incident.source) {
            sources.push(r.incident.source.clone());
        }
    }

    let provenance = MergeProvenance {
        sources,
        members: ranked
            .iter()
            .map(|r| MemberSnapshot {
                incident_id: r.incident.id.clone(),
                source: r.incident.source.clone(),
                reliability: r.reliability,
            })
            .collect(),
        merge_reason,
        merged_at,
    };

    let absorbed = ranked
        .iter()
        .skip(1)
        .map(|r| DuplicateRecord {
            incident_id: r.incident.id.clone(),
            source: r.incident.source.clone(),
            merged_into: id.clone(),
        })
        .collect();

    MergeOutcome {
        merged: MergedIncident {
            incident,
            provenance,
        },
        absorbed,
    }
}

fn pick_text(ranked: &[Ranked<'_>], field: impl Fn(&Incident) -> &str) -> String {
    let mut best: Option<(f64, &str)> = None;

    for r in ranked {
        let value = field(r.incident);
        if value.trim().is_empty() {
            continue;
        }
        let better = best.is_none_or(|(reliability, current)| {
            r.reliability
                .total_cmp(&reliability)
                .then(value.len().cmp(&current.len()))
                == Ordering::Greater
        });
        if better {
            best = Some((r.reliability, value));
        }
    }

    best.map(|(_, v)| v.to_string()).unwrap_or_default()
}

fn pick_severity(ranked: &[Ranked<'_>]) -> Severity {
    let mut best = ranked.first().map(|r| r.incident.severity).unwrap_or_default();
    for r in ranked.iter().skip(1) {
        if r.incident.severity > best {
            best = r.incident.severity;
        }
    }
    best
}

fn merge_timestamps(ranked: &[Ranked<'_>]) -> IncidentTimestamps {
    let all = || ranked.iter().map(|r| &r.incident.timestamps);
    IncidentTimestamps {
        reported: all().filter_map(|t| t.reported).min(),
        created: all().filter_map(|t| t.created).min(),
        updated: all().filter_map(|t| t.updated).max(),
    }
}

#[cfg(test)]
mod tests {
    use incident_hub_incident_models::{Coordinates, lenient::parse_timestamp};

    use super::*;

    fn incident(id: &str, source: &str, title: &str) -> Incident {
        Incident {
            id: id.into(),
            source: source.into(),
            title: title.into(),
            ..Incident::default()
        }
    }

    fn now() -> DateTime<Utc> {
        parse_timestamp("2024-03-01T12:30:00Z").unwrap()
    }

    #[test]
    fn most_reliable_member_wins_text_fields() {
        let mut a = incident("a", "street_manager", "Roadworks on Westgate Road");
        a.location = "Westgate Road".into();
        let mut b = incident("b", "tomtom", "Westgate Road roadworks causing long delays");
        b.location = "Westgate Rd, Newcastle upon Tyne".into();
        let mut c = incident("c", "feedZ", "Westgate Road roadworks, expect delays all day");
        c.location = "Newcastle city centre, Westgate Road".into();

        let out = merge_group(&[&c, &b, &a], "test".into(), now());
        assert_eq!(out.merged.incident.title, a.title);
        assert_eq!(out.merged.incident.location, a.location);
        assert_eq!(out.merged.incident.source, "street_manager");
    }

    #[test]
    fn empty_values_are_skipped_and_length_breaks_ties() {
        let a = incident("a", "feedX", "");
        let b = incident("b", "feedY", "Short");
        let c = incident("c", "feedZ", "Much longer title");
        let out = merge_group(&[&a, &b, &c], "test".into(), now());
        assert_eq!(out.merged.incident.title, "Much longer title");
    }

    #[test]
    fn coordinates_come_from_most_reliable_positioned_member() {
        let a = incident("a", "national_highways", "x");
        let mut b = incident("b", "here", "y");
        b.coordinates = Coordinates::new(54.97, -1.61);
        let mut c = incident("c", "social_media", "z");
        c.coordinates = Coordinates::new(54.98, -1.62);
        let out = merge_group(&[&c, &a, &b], "test".into(), now());
        assert_eq!(out.merged.incident.coordinates, b.coordinates);
    }

    #[test]
    fn highest_severity_wins() {
        let mut a = incident("a", "national_highways", "x");
        a.severity = Severity::Medium;
        let mut b = incident("b", "social_media", "y");
        b.severity = Severity::Critical;
        let out = merge_group(&[&a, &b], "test".into(), now());
        assert_eq!(out.merged.incident.severity, Severity::Critical);
    }

    #[test]
    fn routes_are_unioned_and_sorted() {
        let mut a = incident("a", "nexus", "x");
        a.affects_routes = ["Q3", "21"].iter().map(|s| (*s).to_string()).collect();
        let mut b = incident("b", "tomtom", "y");
        b.affects_routes = ["22", "21"].iter().map(|s| (*s).to_string()).collect();
        let out = merge_group(&[&a, &b], "test".into(), now());
        let routes: Vec<_> = out.merged.incident.affects_routes.into_iter().collect();
        assert_eq!(routes, vec!["21", "22", "Q3"]);
    }

    #[test]
    fn timestamps_span_members() {
        let mut a = incident("a", "nexus", "x");
        a.timestamps.reported = parse_timestamp("2024-03-01T12:05:00Z");
        a.timestamps.updated = parse_timestamp("2024-03-01T12:20:00Z");
        let mut b = incident("b", "tomtom", "y");
        b.timestamps.reported = parse_timestamp("2024-03-01T12:00:00Z");
        b.timestamps.updated = parse_timestamp("2024-03-01T12:10:00Z");
        let out = merge_group(&[&a, &b], "test".into(), now());
        let t = out.merged.incident.timestamps;
        assert_eq!(t.reported, b.timestamps.reported);
        assert_eq!(t.updated, a.timestamps.updated);
        assert_eq!(t.created, None);
    }

    #[test]
    fn absorbed_lists_every_non_primary_member() {
        let a = incident("a", "tomtom", "x");
        let b = incident("b", "national_highways", "y");
        let c = incident("c", "tomtom", "z");
        let out = merge_group(&[&a, &b, &c], "test".into(), now());
        let absorbed: Vec<_> = out.absorbed.iter().map(|d| d.incident_id.as_str()).collect();
        assert_eq!(absorbed, vec!["a", "c"]);
        assert!(out.absorbed.iter().all(|d| d.merged_into == out.merged.incident.id));
        assert_eq!(
            out.merged.provenance.sources,
            vec!["national_highways".to_string(), "tomtom".to_string()]
        );
        assert_eq!(out.merged.provenance.members.len(), 3);
    }

    #[test]
    fn merge_id_ignores_member_order() {
        let id = merge_id(["b", "a"]);
        assert_eq!(id, merge_id(["a", "b"]));
        assert!(id.starts_with(MERGE_ID_PREFIX));
        assert_eq!(id.len(), MERGE_ID_PREFIX.len() + MERGE_ID_HEX_LEN);
        assert_ne!(id, merge_id(["a", "c"]));
    }

    #[test]
    fn merge_flags_and_timestamp_are_set() {
        let a = incident("a", "x", "t");
        let b = incident("b", "y", "t");
        let out = merge_group(&[&a, &b], "geographic (3 m)".into(), now());
        assert!(out.merged.incident.merged);
        assert!(out.merged.incident.processed);
        assert_eq!(out.merged.provenance.merged_at, now());
        assert_eq!(out.merged.provenance.merge_reason, "geographic (3 m)");
    }
}
