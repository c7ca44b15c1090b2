//! Fills in affected routes on a batch of incidents.

use incident_hub_incident_models::Incident;
use serde::Serialize;

use crate::matcher::RouteMatcher;

/// Counters from one attribution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionStats {
    /// Incidents that gained at least one route.
    pub attributed: usize,
    /// Incidents for which nothing matched.
    pub unmatched: usize,
    /// Incidents that already listed routes and were left alone.
    pub skipped: usize,
}

/// Attributes routes to every incident whose route list is empty, using
/// its coordinates first and its title, location and description as the
/// text fallback. Incidents that already name routes keep them.
pub fn attribute_routes(matcher: &RouteMatcher, incidents: &mut [Incident]) -> AttributionStats {
    let mut stats = AttributionStats::default();

    for incident in incidents.iter_mut() {
        if !incident.affects_routes.is_empty() {
            stats.skipped += 1;
            continue;
        }

        let result =
            matcher.find_routes_for(incident.valid_coordinates(), &incident.searchable_text());
        if result.is_empty() {
            stats.unmatched += 1;
            continue;
        }

        log::trace!(
            "Incident {} affects {:?} ({}, {})",
            incident.id,
            result.routes,
            result.method,
            result.confidence
        );
        incident.affects_routes.extend(result.routes);
        stats.attributed += 1;
    }

    log::info!(
        "Route attribution: {} attributed, {} unmatched, {} already listed",
        stats.attributed,
        stats.unmatched,
        stats.skipped
    );

    stats
}

#[cfg(test)]
mod tests {
    use incident_hub_spatial::Coordinates;

    use super::*;
    use crate::matcher::tests::{SpySource, matcher_with};

    fn incident(id: &str, coordinates: Option<Coordinates>, title: &str) -> Incident {
        Incident {
            id: id.into(),
            title: title.into(),
            coordinates,
            ..Incident::default()
        }
    }

    #[test]
    fn fills_only_incidents_without_routes() {
        let matcher = matcher_with(SpySource::answering(vec![(100, vec!["shp_a"])]));
        let near = Coordinates::new(54.9754, -1.6141);

        let mut listed = incident("listed", near, "");
        listed.affects_routes.insert("X9".into());

        let mut incidents = vec![
            incident("geo", near, "Collision"),
            incident("text", None, "Lane closed on the Quayside"),
            incident("none", None, "Roadworks elsewhere"),
            listed,
        ];

        let stats = attribute_routes(&matcher, &mut incidents);

        assert_eq!(
            stats,
            AttributionStats {
                attributed: 2,
                unmatched: 1,
                skipped: 1,
            }
        );
        let routes = |i: usize| incidents[i].affects_routes.iter().cloned().collect::<Vec<_>>();
        assert_eq!(routes(0), vec!["21", "22"]);
        assert_eq!(routes(1), vec!["Q1", "Q2", "Q3"]);
        assert!(routes(2).is_empty());
        assert_eq!(routes(3), vec!["X9"]);
    }

    #[test]
    fn description_and_location_feed_the_text_fallback() {
        let matcher = matcher_with(SpySource::answering(Vec::new()));
        let mut incidents = vec![Incident {
            id: "1".into(),
            title: "Breakdown".into(),
            location: "Westgate Road".into(),
            ..Incident::default()
        }];

        let stats = attribute_routes(&matcher, &mut incidents);
        assert_eq!(stats.attributed, 1);
        assert!(incidents[0].affects_routes.contains("39"));
    }
}
