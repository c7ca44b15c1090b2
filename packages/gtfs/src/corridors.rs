//! Text fallback for route attribution.
//!
//! When no route geometry lies near an incident (or it has no coordinates),
//! its free text is matched against a curated table of named road corridors
//! and areas, each mapped to the bus routes that use it. Explicit mentions
//! such as "service 21" are also picked up when the index knows the route.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter};

use crate::index::GtfsIndex;

/// Named corridors and areas with a known set of routes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Corridor {
    /// The Tyne Bridge between Newcastle and Gateshead.
    TyneBridge,
    /// The A167(M) through the city centre.
    CentralMotorway,
    /// The A1058 towards the coast.
    CoastRoad,
    /// Westgate Road, west of the centre.
    WestgateRoad,
    /// Shields Road in Byker.
    ShieldsRoad,
    /// Great North Road through Gosforth.
    GreatNorthRoad,
    /// The Quayside and Sandhill.
    Quayside,
    /// Haymarket and Percy Street.
    Haymarket,
    /// The A1 Western Bypass and the Metrocentre.
    WesternBypass,
    /// Eldon Square and Monument.
    EldonSquare,
}

impl Corridor {
    /// Normalized phrases that identify this corridor.
    #[must_use]
    pub const fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::TyneBridge => &["tyne bridge"],
            Self::CentralMotorway => &["central motorway", "a167 m", "a167m"],
            Self::CoastRoad => &["coast road", "a1058"],
            Self::WestgateRoad => &["westgate road", "westgate rd"],
            Self::ShieldsRoad => &["shields road", "byker"],
            Self::GreatNorthRoad => &["great north road", "gosforth high street", "a189"],
            Self::Quayside => &["quayside", "sandhill"],
            Self::Haymarket => &["haymarket", "percy street"],
            Self::WesternBypass => &[
                "western bypass",
                "a1 western by pass",
                "metrocentre",
                "lobley hill",
            ],
            Self::EldonSquare => &["eldon square", "blackett street", "monument"],
        }
    }

    /// Short names of the routes using this corridor.
    #[must_use]
    pub const fn routes(self) -> &'static [&'static str] {
        match self {
            Self::TyneBridge => &["10", "21", "25", "28", "X21"],
            Self::CentralMotorway => &["X7", "X8", "X9", "X10"],
            Self::CoastRoad => &["1", "306", "308", "309"],
            Self::WestgateRoad => &["38", "39", "40", "71"],
            Self::ShieldsRoad => &["1", "12", "39", "40", "62", "63"],
            Self::GreatNorthRoad => &["43", "44", "45", "46", "47", "X33"],
            Self::Quayside => &["Q1", "Q2", "Q3"],
            Self::Haymarket => &["43", "44", "45", "47", "X33", "X34"],
            Self::WesternBypass => &["100", "X45", "X46", "X47"],
            Self::EldonSquare => &["1", "12", "22", "39", "40"],
        }
    }

    /// Corridors named in `text`, in declaration order.
    #[must_use]
    pub fn mentioned_in(text: &str) -> Vec<Self> {
        let padded = format!(" {} ", normalize(text));
        Self::iter()
            .filter(|c| {
                c.keywords()
                    .iter()
                    .any(|k| padded.contains(&format!(" {k} ")))
            })
            .collect()
    }
}

/// Anything that is not a letter or digit.
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// "service 21", "bus X33", "route no Q3".
static ROUTE_MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:services?|routes?|bus(?:es)?)\s+(?:no\s+|number\s+)?([a-z]{0,2}\d{1,3}[a-z]?)\b",
    )
    .expect("valid regex")
});

fn normalize(text: &str) -> String {
    NON_ALNUM_RE
        .replace_all(&text.to_lowercase(), " ")
        .trim()
        .to_string()
}

/// Routes suggested by `text`: corridor routes plus explicit mentions the
/// index knows about. Sorted and unique.
#[must_use]
pub fn routes_from_text(text: &str, index: &GtfsIndex) -> BTreeSet<String> {
    let mut routes: BTreeSet<String> = Corridor::mentioned_in(text)
        .into_iter()
        .flat_map(|c| c.routes().iter().map(|r| (*r).to_string()))
        .collect();

    let normalized = normalize(text);
    for capture in ROUTE_MENTION_RE.captures_iter(&normalized) {
        let Some(raw) = capture.get(1) else {
            continue;
        };
        let name = raw.as_str().to_uppercase();
        if index.knows_route(&name) {
            routes.insert(name);
        }
    }

    routes
}
