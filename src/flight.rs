//! Per-aircraft aggregate state and the store that owns it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, trace};

use crate::region::RegionSet;
use crate::report::Report;

/// Default time a flight may go unseen before the expiration sweep evicts it (seconds).
pub const DEFAULT_EXPIRY_SECS: i64 = 600;

/// How far apart (in stream time) two reports can be for the later one to still coalesce with
/// the earlier, rather than being treated as a gap that resets proximity eligibility. Also used
/// by the driver loop to drop grossly out-of-order input.
pub const REORDER_TOLERANCE_SECS: i64 = 60;

/// Rolling per-aircraft state: latest two reports, region membership (current and previous),
/// sticky notes, and per-rule cooldown timestamps.
#[derive(Debug, Clone)]
pub struct Flight {
    pub identifier: String,
    pub last_report: Report,
    pub prev_report: Option<Report>,
    pub current_regions: Vec<Option<String>>,
    pub previous_regions: Vec<Option<String>>,
    pub notes: HashMap<String, Option<String>>,
    rule_cooldowns: Vec<Option<i64>>,
    pub created_at: i64,
    pub last_seen_at: i64,
    pub expire_callbacks: Vec<String>,
}

impl Flight {
    fn new(report: Report, regions: Vec<Option<String>>, rule_count: usize) -> Self {
        Self {
            identifier: report.identifier.clone(),
            created_at: report.timestamp,
            last_seen_at: report.timestamp,
            current_regions: regions.clone(),
            previous_regions: regions,
            last_report: report,
            prev_report: None,
            notes: HashMap::new(),
            rule_cooldowns: vec![None; rule_count],
            expire_callbacks: Vec::new(),
        }
    }

    fn absorb(&mut self, report: Report, regions: Vec<Option<String>>) {
        self.previous_regions = std::mem::replace(&mut self.current_regions, regions);
        self.prev_report = Some(std::mem::replace(&mut self.last_report, report));
        self.last_seen_at = self.last_report.timestamp;
    }

    /// Last fire timestamp of rule `rule_index` for this flight, if any.
    pub fn rule_cooldown(&self, rule_index: usize) -> Option<i64> {
        self.rule_cooldowns.get(rule_index).copied().flatten()
    }

    pub(crate) fn set_rule_cooldown(&mut self, rule_index: usize, now: i64) {
        if rule_index >= self.rule_cooldowns.len() {
            self.rule_cooldowns.resize(rule_index + 1, None);
        }
        self.rule_cooldowns[rule_index] = Some(now);
    }

    pub(crate) fn ensure_cooldown_slots(&mut self, rule_count: usize) {
        if self.rule_cooldowns.len() < rule_count {
            self.rule_cooldowns.resize(rule_count, None);
        }
    }

    /// True if some file's region membership differs between `previous_regions` and
    /// `current_regions`.
    pub fn regions_changed(&self) -> bool {
        self.previous_regions != self.current_regions
    }

    /// Current altitude, in feet MSL, if known.
    pub fn altitude_ft(&self) -> Option<i32> {
        self.last_report.alt_baro
    }

    pub fn notes_view(&self) -> &HashMap<String, Option<String>> {
        &self.notes
    }
}

/// Read-only snapshot of a flight, the only view user callbacks are handed (decouples user code
/// from the internal aggregate).
#[derive(Debug, Clone)]
pub struct FlightView {
    pub identifier: String,
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
    pub alt_baro: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub attrs: HashMap<String, Value>,
    pub notes: HashMap<String, Option<String>>,
}

impl From<&Flight> for FlightView {
    fn from(f: &Flight) -> Self {
        Self {
            identifier: f.identifier.clone(),
            timestamp: f.last_report.timestamp,
            lat: f.last_report.lat,
            lon: f.last_report.lon,
            alt_baro: f.last_report.alt_baro,
            ground_speed: f.last_report.ground_speed,
            track: f.last_report.track,
            attrs: f.last_report.attrs.clone(),
            notes: f.notes.clone(),
        }
    }
}

/// Owns the live aircraft state. Single-writer (the driver loop); a plain `HashMap` is enough
/// since no other thread ever mutates it concurrently; a single-writer contract makes a
/// lock-striped map an unneeded dependency for this component (see DESIGN.md).
#[derive(Debug, Default)]
pub struct FlightStore {
    flights: HashMap<String, Flight>,
    expiry_secs: i64,
}

impl FlightStore {
    pub fn new(expiry_secs: i64) -> Self {
        Self { flights: HashMap::new(), expiry_secs }
    }

    /// Upsert a report into its flight. Returns `(identifier, created)`. Reports with missing
    /// position never reach here (the ingest/parse boundary rejects them); the caller is
    /// responsible for the 60-second reorder tolerance.
    pub fn update(&mut self, report: Report, regions: &RegionSet, rule_count: usize) -> (&Flight, bool) {
        let resolved = regions.resolve(report.lat, report.lon);
        let id = report.identifier.clone();

        let created = !self.flights.contains_key(&id);
        if created {
            trace!(identifier = %id, "new flight");
            self.flights.insert(id.clone(), Flight::new(report, resolved, rule_count));
        } else {
            let flight = self.flights.get_mut(&id).unwrap();
            flight.ensure_cooldown_slots(rule_count);
            flight.absorb(report, resolved);
        }

        (self.flights.get(&id).unwrap(), created)
    }

    pub fn get(&self, identifier: &str) -> Option<&Flight> {
        self.flights.get(identifier)
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut Flight> {
        self.flights.get_mut(identifier)
    }

    /// Snapshot of all live flights, for cross-flight queries like proximity.
    pub fn iter_live(&self) -> impl Iterator<Item = &Flight> {
        self.flights.values()
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Remove every flight not seen for `expiry_secs`, invoking `on_expire` for each (the driver
    /// wires this to the action dispatcher's registered `expire_callback`s).
    pub fn expire(&mut self, now: i64, on_expire: impl FnMut(&Flight)) -> usize {
        self.expire_matching(on_expire, |f| now - f.last_seen_at >= self.expiry_secs)
    }

    /// Evict every remaining flight, regardless of its last-seen time. Used for the driver's
    /// terminal sweep on source exhaustion, which must fire every registered
    /// `expire_callback` exactly once even for flights still within their expiry window.
    pub fn expire_all(&mut self, on_expire: impl FnMut(&Flight)) -> usize {
        self.expire_matching(on_expire, |_| true)
    }

    fn expire_matching(&mut self, mut on_expire: impl FnMut(&Flight), due: impl Fn(&Flight) -> bool) -> usize {
        let expired: Vec<String> = self.flights.iter().filter(|(_, f)| due(f)).map(|(id, _)| id.clone()).collect();

        for id in &expired {
            if let Some(flight) = self.flights.get(id) {
                on_expire(flight);
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "expired flights");
        }

        for id in &expired {
            self.flights.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionSet;

    fn report(id: &str, ts: i64, lat: f64, lon: f64) -> Report {
        Report::new(id, ts, lat, lon)
    }

    #[test]
    fn update_creates_then_updates() {
        let mut store = FlightStore::new(600);
        let regions = RegionSet::default();

        let (_, created) = store.update(report("N1", 0, 0.0, 0.0), &regions, 0);
        assert!(created);

        let (flight, created) = store.update(report("N1", 10, 1.0, 1.0), &regions, 0);
        assert!(!created);
        assert_eq!(flight.prev_report.as_ref().unwrap().timestamp, 0);
        assert_eq!(flight.last_report.timestamp, 10);
    }

    #[test]
    fn invariant_prev_before_last() {
        let mut store = FlightStore::new(600);
        let regions = RegionSet::default();
        store.update(report("N1", 5, 0.0, 0.0), &regions, 0);
        let (flight, _) = store.update(report("N1", 20, 0.0, 0.0), &regions, 0);
        assert!(flight.prev_report.as_ref().unwrap().timestamp <= flight.last_report.timestamp);
    }

    #[test]
    fn expiry_evicts_and_invokes_hook() {
        let mut store = FlightStore::new(600);
        let regions = RegionSet::default();
        store.update(report("N1", 0, 0.0, 0.0), &regions, 0);

        let mut evicted = Vec::new();
        let count = store.expire(650, |f| evicted.push(f.identifier.clone()));

        assert_eq!(count, 1);
        assert_eq!(evicted, vec!["N1".to_string()]);
        assert!(store.get("N1").is_none());
    }

    #[test]
    fn flight_not_evicted_before_expiry() {
        let mut store = FlightStore::new(600);
        let regions = RegionSet::default();
        store.update(report("N1", 0, 0.0, 0.0), &regions, 0);
        let count = store.expire(300, |_| {});
        assert_eq!(count, 0);
        assert!(store.get("N1").is_some());
    }
}
