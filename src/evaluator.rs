//! Applies compiled rules to a flight's latest state, manages cooldowns, dispatches actions.

use std::collections::HashMap;

use crate::actions::ActionDispatcher;
use crate::flight::{Flight, FlightStore};
use crate::lists::AircraftListSet;
use crate::proximity::ProximityEngine;
use crate::region::RegionSet;
use crate::rules::{Condition, Rule, RuleSet};

/// 1-degree lat/lon grid cell key, used by the optional spatial index over `latlongring` rules.
type GridCell = (i32, i32);

fn grid_cell(lat: f64, lon: f64) -> GridCell {
    (lat.floor() as i32, lon.floor() as i32)
}

/// Evaluates rules for one flight at a time. Holds the engine-wide read-only data (lists,
/// regions) plus the optional acceleration index; mutable rule state (cooldowns) lives on the
/// `RuleSet`/`Flight` themselves.
pub struct RuleEvaluator {
    lists: AircraftListSet,
    timezone: chrono_tz::Tz,
    spatial_index: Option<HashMap<GridCell, Vec<usize>>>,
}

impl RuleEvaluator {
    pub fn new(lists: AircraftListSet, timezone: chrono_tz::Tz) -> Self {
        Self { lists, timezone, spatial_index: None }
    }

    /// Build the optional grid index over every rule whose `latlongring` center falls in the
    /// returned cell plus its 8 neighbors (a ring can straddle a cell boundary). Disabling the
    /// index (never calling this) must not change evaluation results.
    pub fn with_spatial_index(mut self, rules: &RuleSet) -> Self {
        let mut index: HashMap<GridCell, Vec<usize>> = HashMap::new();
        for rule in rules.iter() {
            for cond in &rule.conditions {
                if let Condition::LatLongRing { lat, lon, .. } = cond {
                    let (cy, cx) = grid_cell(*lat, *lon);
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            index.entry((cy + dy, cx + dx)).or_default().push(rule.index);
                        }
                    }
                }
            }
        }
        self.spatial_index = Some(index);
        self
    }

    /// Candidate rule indices for a point, given the spatial index (or all rules, if disabled).
    fn candidate_rules<'a>(&self, rules: &'a RuleSet, lat: f64, lon: f64) -> Vec<&'a Rule> {
        match &self.spatial_index {
            None => rules.iter().collect(),
            Some(index) => {
                let cell = grid_cell(lat, lon);
                let mut seen = std::collections::HashSet::new();
                let mut out = Vec::new();
                for rule in rules.iter() {
                    let has_ring = rule.conditions.iter().any(|c| matches!(c, Condition::LatLongRing { .. }));
                    let eligible = !has_ring || index.get(&cell).map(|v| v.contains(&rule.index)).unwrap_or(false);
                    if eligible && seen.insert(rule.index) {
                        out.push(rule);
                    }
                }
                out
            }
        }
    }

    /// Evaluate every rule against `identifier`'s current state at stream time `now`, dispatching
    /// matched actions through `dispatcher`. Returns the number of rules that matched.
    pub fn process(
        &self,
        identifier: &str,
        now: i64,
        store: &mut FlightStore,
        rules: &mut RuleSet,
        regions: &RegionSet,
        proximity: &ProximityEngine,
        dispatcher: &mut ActionDispatcher,
    ) -> usize {
        let (lat, lon) = match store.get(identifier) {
            Some(f) => (f.last_report.lat, f.last_report.lon),
            None => return 0,
        };

        let candidate_indices: Vec<usize> = self.candidate_rules(rules, lat, lon).iter().map(|r| r.index).collect();
        let mut matched = 0;

        for rule_index in candidate_indices {
            let rule = rules.get(rule_index).expect("candidate index always valid");

            let flight = match store.get(identifier) {
                Some(f) => f,
                None => return matched,
            };

            if cooldown_blocks(rule, flight, now) {
                continue;
            }

            let partner_id = self.evaluate_conditions(rule, flight, regions, store, proximity, now);
            let is_match = match partner_id {
                EvalResult::NoMatch => false,
                EvalResult::Match | EvalResult::MatchWithPartner(_) => true,
            };

            if !is_match {
                continue;
            }
            matched += 1;

            let rule_mut = rules.get_mut(rule_index).expect("candidate index always valid");
            rule_mut.last_rule_fire_ts = Some(now);
            let rule_snapshot = rule_mut.clone();

            if let Some(flight) = store.get_mut(identifier) {
                flight.set_rule_cooldown(rule_index, now);
            }

            let partner = match &partner_id {
                EvalResult::MatchWithPartner(id) => store.get(id).map(|f| f.into()),
                _ => None,
            };
            let flight_view = store.get(identifier).map(|f| f.into());
            if let Some(flight_view) = flight_view {
                dispatcher.dispatch(&rule_snapshot, flight_view, partner, store, identifier);
            }
        }

        matched
    }

    fn evaluate_conditions(
        &self,
        rule: &Rule,
        flight: &Flight,
        regions: &RegionSet,
        store: &FlightStore,
        proximity: &ProximityEngine,
        now: i64,
    ) -> EvalResult {
        let mut partner: Option<String> = None;

        for cond in &rule.conditions {
            let ok = match cond {
                Condition::MinAlt(a) => flight.altitude_ft().map(|alt| alt >= *a).unwrap_or(false),
                Condition::MaxAlt(a) => flight.altitude_ft().map(|alt| alt <= *a).unwrap_or(false),
                Condition::AircraftList(name) => self.lists.membership(name, &flight.identifier),
                Condition::ExcludeAircraftList(name) => !self.lists.membership(name, &flight.identifier),
                Condition::ExcludeAircraftSubstrs(substrs) => {
                    !substrs.iter().any(|s| flight.identifier.contains(s.as_str()))
                }
                Condition::Regions(names) => {
                    if names.is_empty() {
                        flight.current_regions.iter().all(|r| r.is_none())
                    } else {
                        flight.current_regions.iter().any(|r| match r {
                            Some(name) => names.iter().any(|n| n.as_deref() == Some(name.as_str())),
                            None => names.contains(&None),
                        })
                    }
                }
                Condition::TransitionRegions(from, to) => flight
                    .previous_regions
                    .iter()
                    .zip(flight.current_regions.iter())
                    .any(|(prev, cur)| prev.as_deref() == from.as_deref() && cur.as_deref() == to.as_deref()),
                Condition::ChangedRegions => flight.regions_changed(),
                Condition::LatLongRing { nm, lat, lon } => {
                    crate::geomath::point_in_ring(flight.last_report.lat, flight.last_report.lon, *lat, *lon, *nm)
                }
                Condition::Proximity { alt_ft, lat_nm } => {
                    match proximity.nearest_partner(flight, store, *alt_ft, *lat_nm, now) {
                        Some(id) => {
                            partner = Some(id);
                            true
                        }
                        None => false,
                    }
                }
                Condition::HasAttr(name) => flight.last_report.has_attr(name),
                Condition::MinTime(t) => local_hhmm(flight.last_report.timestamp, &self.timezone) >= *t,
                Condition::MaxTime(t) => local_hhmm(flight.last_report.timestamp, &self.timezone) <= *t,
            };
            let regions = regions; // conditions reference the region set only via `current_regions`/`previous_regions`
            let _ = regions;
            if !ok {
                return EvalResult::NoMatch;
            }
        }

        match partner {
            Some(id) => EvalResult::MatchWithPartner(id),
            None => EvalResult::Match,
        }
    }
}

enum EvalResult {
    NoMatch,
    Match,
    MatchWithPartner(String),
}

fn cooldown_blocks(rule: &Rule, flight: &Flight, now: i64) -> bool {
    if let Some(last) = rule.last_rule_fire_ts {
        if now - last < rule.cooldown_rule_secs {
            return true;
        }
    }
    if let Some(last) = flight.rule_cooldown(rule.index) {
        if now - last < rule.cooldown_flight_secs {
            return true;
        }
    }
    false
}

fn local_hhmm(timestamp: i64, tz: &chrono_tz::Tz) -> u32 {
    use chrono::{TimeZone, Timelike};
    let dt = tz.timestamp_opt(timestamp, 0).single().unwrap_or_else(|| tz.timestamp_opt(timestamp, 0).earliest().unwrap());
    dt.hour() * 100 + dt.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionDispatcher;
    use crate::proximity::ProximityEngine;
    use crate::report::Report;
    use crate::rules::compile;
    use std::sync::{Arc, Mutex};

    fn setup(toml_src: &str, callbacks: &[&str]) -> (RuleEvaluator, RuleSet, FlightStore, RegionSet) {
        let raw: crate::rules::RawConfig = toml::from_str(toml_src).unwrap();
        let (rules, lists) = compile(raw, callbacks).unwrap();
        let evaluator = RuleEvaluator::new(lists, chrono_tz::UTC);
        (evaluator, rules, FlightStore::new(600), RegionSet::default())
    }

    #[test]
    fn cooldown_suppresses_repeat_fire() {
        let (evaluator, mut rules, mut store, regions) = setup(
            r#"
            [rules.low]
            conditions = { max_alt = 1000, cooldown = 1 }
            actions = { print = true }
            "#,
            &[],
        );
        let mut dispatcher = ActionDispatcher::new();
        let proximity = ProximityEngine::new(60);

        let mut report = Report::new("N1", 0, 0.0, 0.0);
        report.alt_baro = Some(500);
        store.update(report.clone(), &regions, rules.len());
        let m1 = evaluator.process("N1", 0, &mut store, &mut rules, &regions, &proximity, &mut dispatcher);

        report.timestamp = 30;
        store.update(report.clone(), &regions, rules.len());
        let m2 = evaluator.process("N1", 30, &mut store, &mut rules, &regions, &proximity, &mut dispatcher);

        report.timestamp = 65;
        store.update(report, &regions, rules.len());
        let m3 = evaluator.process("N1", 65, &mut store, &mut rules, &regions, &proximity, &mut dispatcher);

        assert_eq!(m1, 1);
        assert_eq!(m2, 0, "within cooldown window");
        assert_eq!(m3, 1, "cooldown elapsed");
    }

    #[test]
    fn empty_regions_list_matches_only_when_no_region() {
        let (evaluator, mut rules, mut store, regions) = setup(
            r#"
            [rules.outside]
            conditions = { regions = [] }
            actions = { track = true }
            "#,
            &[],
        );
        let mut dispatcher = ActionDispatcher::new();
        let proximity = ProximityEngine::new(60);

        let report = Report::new("N1", 0, 10.0, 10.0);
        store.update(report, &regions, rules.len());
        let matched = evaluator.process("N1", 0, &mut store, &mut rules, &regions, &proximity, &mut dispatcher);
        assert_eq!(matched, 1);
    }

    #[test]
    fn callback_invoked_on_match() {
        let (evaluator, mut rules, mut store, regions) = setup(
            r#"
            [rules.low]
            conditions = { max_alt = 1000 }
            actions = { callback = "low_cb" }
            "#,
            &["low_cb"],
        );
        let calls = Arc::new(Mutex::new(0));
        let calls2 = calls.clone();
        let mut dispatcher = ActionDispatcher::new();
        dispatcher.register_callback("low_cb", move |_flight, _partner| {
            *calls2.lock().unwrap() += 1;
        });
        let proximity = ProximityEngine::new(60);

        let mut report = Report::new("N1", 0, 0.0, 0.0);
        report.alt_baro = Some(200);
        store.update(report, &regions, rules.len());
        evaluator.process("N1", 0, &mut store, &mut rules, &regions, &proximity, &mut dispatcher);

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
