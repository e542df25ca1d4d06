//! Discovers nearby flight pairs for rules with a `proximity` condition.

use crate::flight::{Flight, FlightStore};
use crate::geomath::distance_nm;

/// O(N) scan over live flights bounded by recency. Stateless aside from the recency window,
/// which mirrors the driver's reorder tolerance rather than independently configuring it.
pub struct ProximityEngine {
    window_secs: i64,
}

impl ProximityEngine {
    pub fn new(window_secs: i64) -> Self {
        Self { window_secs }
    }

    /// First other live flight within `alt_ft` and `lat_nm` of `flight`, both last seen within
    /// `window_secs` of `now`. Self-exclusion is automatic since the store is keyed by
    /// identifier and a flight is never its own partner.
    pub fn nearest_partner(&self, flight: &Flight, store: &FlightStore, alt_ft: i32, lat_nm: f64, now: i64) -> Option<String> {
        let my_alt = flight.altitude_ft()?;

        store
            .iter_live()
            .filter(|other| other.identifier != flight.identifier)
            .filter(|other| (now - other.last_seen_at).abs() <= self.window_secs)
            .filter_map(|other| {
                let other_alt = other.altitude_ft()?;
                if (my_alt - other_alt).unsigned_abs() as i32 > alt_ft {
                    return None;
                }
                let d = distance_nm(flight.last_report.lat, flight.last_report.lon, other.last_report.lat, other.last_report.lon);
                (d <= lat_nm).then(|| other.identifier.clone())
            })
            .next()
    }
}
