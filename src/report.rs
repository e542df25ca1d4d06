//! The normalized, immutable per-point observation the rest of the engine operates on.

use std::collections::HashMap;

use serde_json::Value;

/// One ADS-B position report, normalized from whatever the ingest adapter produced.
///
/// `Report` is intentionally cheap to construct and immutable: it is discarded after the flight
/// it belongs to has folded it into state (no history beyond `Flight::prev_report` is kept).
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub identifier: String,
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt_baro: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub attrs: HashMap<String, Value>,
}

impl Report {
    pub fn new(identifier: impl Into<String>, timestamp: i64, lat: f64, lon: f64) -> Self {
        Self {
            identifier: normalize_identifier(identifier.into()),
            timestamp,
            lat,
            lon,
            alt_baro: None,
            ground_speed: None,
            track: None,
            attrs: HashMap::new(),
        }
    }

    /// Whether an attribute is present and "truthy": not null, not an empty string, not
    /// numeric zero. Booleans are truthy iff `true`.
    pub fn has_attr(&self, name: &str) -> bool {
        match self.attrs.get(name) {
            None => false,
            Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }
}

fn normalize_identifier(raw: String) -> String {
    raw.trim().to_uppercase()
}

/// Errors that cause a raw ingest message to be dropped rather than turned into a `Report`.
/// These are counted and logged at `debug!`, never propagated: per-report errors never halt
/// the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRejection {
    MissingIdentifier,
    MissingPosition,
    NotJsonObject,
}

/// Parse a single ingest JSON message into a `Report`.
///
/// Accepts `hex` or `flight` for the identifier, `lat`/`lon` for position, `alt_baro` or `alt`
/// for altitude (the literal string `"ground"` maps to `Some(0)`), and `now` or `seen_pos` for
/// the timestamp (falling back to `fallback_now` when absent).
pub fn parse_report(value: &Value, fallback_now: i64) -> Result<Report, ReportRejection> {
    let obj = value.as_object().ok_or(ReportRejection::NotJsonObject)?;

    let identifier = obj
        .get("hex")
        .or_else(|| obj.get("flight"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ReportRejection::MissingIdentifier)?;

    let lat = obj.get("lat").and_then(Value::as_f64);
    let lon = obj.get("lon").and_then(Value::as_f64);
    let (lat, lon) = match (lat, lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(ReportRejection::MissingPosition),
    };

    let timestamp = obj
        .get("now")
        .or_else(|| obj.get("seen_pos"))
        .and_then(Value::as_f64)
        .map(|f| f as i64)
        .unwrap_or(fallback_now);

    let alt_baro = match obj.get("alt_baro").or_else(|| obj.get("alt")) {
        Some(Value::String(s)) if s.eq_ignore_ascii_case("ground") => Some(0),
        Some(v) => v.as_f64().map(|f| f.round() as i32),
        None => None,
    };

    let ground_speed = obj.get("ground_speed").or_else(|| obj.get("gs")).and_then(Value::as_f64);
    let track = obj.get("track").and_then(Value::as_f64);

    let mut attrs = HashMap::new();
    for (key, v) in obj {
        if matches!(key.as_str(), "hex" | "flight" | "lat" | "lon" | "alt_baro" | "alt" | "now" | "seen_pos" | "ground_speed" | "gs" | "track") {
            continue;
        }
        attrs.insert(key.clone(), v.clone());
    }

    Ok(Report {
        identifier: normalize_identifier(identifier.to_string()),
        timestamp,
        lat,
        lon,
        alt_baro,
        ground_speed,
        track,
        attrs,
    })
}
