//! Forgiving field deserializers for upstream incident records.
//!
//! Feeds disagree on types (numeric ids, `null` titles, epoch timestamps,
//! `[lon, lat]` arrays). Each helper here accepts whatever shape it is
//! handed and falls back to the field's default instead of failing the
//! record.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use incident_hub_spatial::{Coordinates, DEFAULT_SERVICE_REGION, normalize_pair};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::Severity;

/// Epoch values above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Strings, numbers and booleans become text; anything else is empty.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    })
}

/// Booleans, `"true"`/`"yes"`/`"1"` strings and non-zero numbers are `true`.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        ),
        _ => false,
    })
}

/// Accepts `{lat, lon}` / `{lat, lng}` / `{latitude, longitude}` objects or
/// two-element arrays of unknown axis order.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn coordinates<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Coordinates>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(coordinates_from_value))
}

fn coordinates_from_value(value: &Value) -> Option<Coordinates> {
    match value {
        Value::Object(map) => {
            let lat = number(map.get("lat").or_else(|| map.get("latitude")))?;
            let lon = number(
                map.get("lon")
                    .or_else(|| map.get("lng"))
                    .or_else(|| map.get("longitude")),
            )?;
            Coordinates::new(lat, lon)
        }
        Value::Array(items) if items.len() == 2 => {
            let first = number(items.first())?;
            let second = number(items.get(1))?;
            normalize_pair(first, second, Some(&DEFAULT_SERVICE_REGION))
        }
        _ => None,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Severity by name (case-insensitive, with aliases) or by rank 1-4.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn severity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Severity, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Severity::parse_loose(&s).unwrap_or_default(),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u8::try_from(v).ok())
            .and_then(Severity::from_rank)
            .unwrap_or_default(),
        _ => Severity::default(),
    })
}

/// RFC 3339 strings, naive `YYYY-MM-DD HH:MM:SS` strings (read as UTC) or
/// epoch seconds/milliseconds.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => parse_timestamp(&s),
        Some(Value::Number(n)) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    })
}

/// Parses a timestamp string in any of the accepted formats.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    trimmed.parse::<f64>().ok().and_then(epoch_to_datetime)
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value > EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(value as i64)
    } else {
        DateTime::from_timestamp(value as i64, 0)
    }
}

/// Route short names from an array or a `,`/`;`/`|`-separated string.
///
/// # Errors
///
/// Only fails if the underlying deserializer itself fails.
pub fn routes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<String>, D::Error> {
    let mut out = BTreeSet::new();
    match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => push_route(&mut out, &s),
                    Value::Number(n) => push_route(&mut out, &n.to_string()),
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => {
            for part in s.split([',', ';', '|']) {
                push_route(&mut out, part);
            }
        }
        Some(Value::Number(n)) => push_route(&mut out, &n.to_string()),
        _ => {}
    }
    Ok(out)
}

fn push_route(out: &mut BTreeSet<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.insert(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let dt = parse_timestamp("2024-03-01T12:00:00+01:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T11:00:00+00:00");
    }

    #[test]
    fn parses_naive_as_utc() {
        let dt = parse_timestamp("2024-03-01 12:03:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:03:00+00:00");
    }

    #[test]
    fn parses_epoch_seconds_and_millis() {
        let secs = parse_timestamp("1709294400").unwrap();
        let millis = parse_timestamp("1709294400000").unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday-ish").is_none());
        assert!(parse_timestamp("-5").is_none());
    }

    #[test]
    fn reads_coordinate_shapes() {
        let object = serde_json::json!({"lat": 54.975, "lng": -1.614});
        let array = serde_json::json!([-1.614, 54.975]);
        let strings = serde_json::json!({"latitude": "54.975", "longitude": "-1.614"});
        let expected = Coordinates::new(54.975, -1.614);
        assert_eq!(coordinates_from_value(&object), expected);
        assert_eq!(coordinates_from_value(&array), expected);
        assert_eq!(coordinates_from_value(&strings), expected);
        assert_eq!(coordinates_from_value(&serde_json::json!([1.0])), None);
    }
}
