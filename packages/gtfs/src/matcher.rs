//! Adaptive-radius route matching.
//!
//! Geometry is tried first, widening through the configured radii and
//! stopping at the first radius that yields any route. If no radius does,
//! the incident's text is matched against known corridors. Matching never
//! fails: read errors degrade to the next tier and an empty result is a
//! valid answer.

use std::sync::Arc;

use incident_hub_gtfs_models::{MatchConfidence, MatchMethod, MatcherConfig, RouteMatchResult};
use incident_hub_spatial::Coordinates;

use crate::corridors::routes_from_text;
use crate::index::{GtfsIndex, SharedGtfsIndex};
use crate::shapes::ShapeSource;

/// Finds the transit routes affected by an incident.
pub struct RouteMatcher {
    index: Arc<SharedGtfsIndex>,
    source: Arc<dyn ShapeSource>,
    config: MatcherConfig,
}

impl std::fmt::Debug for RouteMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RouteMatcher {
    /// Creates a matcher reading the current snapshot of `index` on every
    /// call, so a refreshed index is picked up without rebuilding the
    /// matcher.
    #[must_use]
    pub fn new(
        index: Arc<SharedGtfsIndex>,
        source: Arc<dyn ShapeSource>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            index,
            source,
            config,
        }
    }

    /// Matching parameters.
    #[must_use]
    pub const fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Routes near `(lat, lon)`, falling back to `text`.
    ///
    /// Out-of-range or non-finite coordinates skip geometry entirely.
    #[must_use]
    pub fn find_routes(&self, lat: f64, lon: f64, text: &str) -> RouteMatchResult {
        self.find_routes_for(Coordinates::new(lat, lon), text)
    }

    /// Routes near `location` if known, falling back to `text`.
    #[must_use]
    pub fn find_routes_for(&self, location: Option<Coordinates>, text: &str) -> RouteMatchResult {
        let index = self.index.snapshot();

        if let Some(target) = location {
            if index.is_ready() {
                if let Some(result) = self.match_geometry(&index, target) {
                    return result;
                }
            } else {
                log::debug!(
                    "Route index is {:?}, skipping geometry for ({}, {})",
                    index.status(),
                    target.lat,
                    target.lon
                );
            }
        }

        Self::match_text(&index, text)
    }

    fn match_geometry(&self, index: &GtfsIndex, target: Coordinates) -> Option<RouteMatchResult> {
        for (tier, &radius) in self.config.radii_m.iter().enumerate() {
            let shapes = match self.source.shapes_within(target, f64::from(radius)) {
                Ok(shapes) => shapes,
                Err(e) => {
                    log::warn!("Shape lookup at {radius} m failed, treating as no match: {e}");
                    continue;
                }
            };

            let routes = index.routes_for_shapes(shapes.iter().map(String::as_str));
            if routes.is_empty() {
                log::trace!(
                    "No routes within {radius} m of ({}, {}) ({} shapes)",
                    target.lat,
                    target.lon,
                    shapes.len()
                );
                continue;
            }

            let confidence = if tier == 0 {
                MatchConfidence::High
            } else {
                MatchConfidence::Medium
            };
            log::debug!(
                "Matched {} routes within {radius} m of ({}, {})",
                routes.len(),
                target.lat,
                target.lon
            );
            return Some(RouteMatchResult {
                routes: routes.into_iter().collect(),
                radius_used: Some(radius),
                confidence,
                method: MatchMethod::Geometry,
            });
        }
        None
    }

    fn match_text(index: &GtfsIndex, text: &str) -> RouteMatchResult {
        if text.trim().is_empty() {
            return RouteMatchResult::none();
        }
        let routes = routes_from_text(text, index);
        if routes.is_empty() {
            return RouteMatchResult::none();
        }
        log::debug!("Matched {} routes from text", routes.len());
        RouteMatchResult {
            routes: routes.into_iter().collect(),
            radius_used: None,
            confidence: MatchConfidence::Low,
            method: MatchMethod::Text,
        }
    }
}
