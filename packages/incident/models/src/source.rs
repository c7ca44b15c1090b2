//! Incident feed taxonomy and static source-reliability priors.
//!
//! Known feeds are a closed enumeration so that a misspelled tag cannot
//! silently pick up the wrong weight; anything unrecognized falls into
//! [`IncidentSource::Other`] at [`DEFAULT_RELIABILITY`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Reliability assigned to feeds that are not in [`KnownSource`].
pub const DEFAULT_RELIABILITY: f64 = 0.5;

/// Incident feeds the service knows how to weigh.
#[derive(
    Debug,
    Clone,
    Copy,
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
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum KnownSource {
    /// Strategic road network operator (motorways and trunk A-roads).
    #[strum(to_string = "national_highways", serialize = "highways_england", serialize = "nh")]
    NationalHighways,
    /// Permitted roadworks register.
    #[strum(to_string = "street_manager", serialize = "roadworks")]
    StreetManager,
    /// Urban traffic control centre run by the local authority.
    #[strum(
        to_string = "traffic_control_centre",
        serialize = "utmc",
        serialize = "council"
    )]
    TrafficControlCentre,
    /// Public transport executive disruption feed.
    #[strum(to_string = "nexus")]
    Nexus,
    /// Commercial probe-data traffic feed.
    #[strum(to_string = "tomtom", serialize = "tom_tom")]
    TomTom,
    /// Commercial traffic incident feed.
    #[strum(to_string = "here", serialize = "here_traffic")]
    Here,
    /// Posts scraped from public social media accounts.
    #[strum(to_string = "social_media", serialize = "twitter", serialize = "x")]
    SocialMedia,
}

impl KnownSource {
    /// Static prior in `[0, 1]` expressing trust in this feed.
    #[must_use]
    pub const fn reliability(self) -> f64 {
        match self {
            Self::NationalHighways => 0.95,
            Self::StreetManager => 0.9,
            Self::TrafficControlCentre => 0.85,
            Self::Nexus => 0.85,
            Self::TomTom => 0.8,
            Self::Here => 0.75,
            Self::SocialMedia => 0.3,
        }
    }
}

/// A parsed incident source tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IncidentSource {
    /// A feed with a documented reliability prior.
    Known(KnownSource),
    /// Any other tag, kept verbatim (trimmed).
    Other(String),
}

impl IncidentSource {
    /// Parses a raw tag. Case, spaces and hyphens are ignored when matching
    /// known feeds, so `"National Highways"` and `"national-highways"` both
    /// resolve to [`KnownSource::NationalHighways`].
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        let trimmed = tag.trim();
        let canonical = trimmed.replace([' ', '-'], "_");
        KnownSource::from_str(&canonical)
            .map_or_else(|_| Self::Other(trimmed.to_string()), Self::Known)
    }

    /// Reliability prior for this source.
    #[must_use]
    pub fn reliability(&self) -> f64 {
        match self {
            Self::Known(known) => known.reliability(),
            Self::Other(_) => DEFAULT_RELIABILITY,
        }
    }
}

impl std::fmt::Display for IncidentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(known) => write!(f, "{known}"),
            Self::Other(tag) => f.write_str(tag),
        }
    }
}

/// Shorthand for `IncidentSource::parse(tag).reliability()`.
#[must_use]
pub fn reliability_of(tag: &str) -> f64 {
    IncidentSource::parse(tag).reliability()
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn reliabilities_are_in_unit_range() {
        for source in KnownSource::iter() {
            let r = source.reliability();
            assert!((0.0..=1.0).contains(&r), "{source:?} reliability {r}");
        }
    }

    #[test]
    fn every_known_source_parses_from_its_name() {
        assert_eq!(KnownSource::iter().count(), 7);
        for source in KnownSource::iter() {
            assert_eq!(
                IncidentSource::parse(source.as_ref()),
                IncidentSource::Known(source)
            );
        }
    }

    #[test]
    fn parses_known_tags_loosely() {
        assert_eq!(
            IncidentSource::parse("National Highways"),
            IncidentSource::Known(KnownSource::NationalHighways)
        );
        assert_eq!(
            IncidentSource::parse("TOMTOM"),
            IncidentSource::Known(KnownSource::TomTom)
        );
        assert_eq!(
            IncidentSource::parse(" roadworks "),
            IncidentSource::Known(KnownSource::StreetManager)
        );
    }

    #[test]
    fn unknown_tags_get_default_reliability() {
        let source = IncidentSource::parse("feedX");
        assert_eq!(source, IncidentSource::Other("feedX".to_string()));
        assert!((source.reliability() - DEFAULT_RELIABILITY).abs() < f64::EPSILON);
        assert!((reliability_of("") - DEFAULT_RELIABILITY).abs() < f64::EPSILON);
    }

    #[test]
    fn display_uses_canonical_tag() {
        assert_eq!(
            IncidentSource::Known(KnownSource::StreetManager).to_string(),
            "street_manager"
        );
        assert_eq!(IncidentSource::Other("feedY".into()).to_string(), "feedY");
    }
}
