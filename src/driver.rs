//! Drives a report source through flight state, the rule evaluator, and periodic expiration.
//! Entirely stream-time: a cancellation signal is observed only between reports, and
//! expiration sweeps are triggered by the reports' own timestamps, never a wall-clock timer.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actions::ActionDispatcher;
use crate::config::EngineConfig;
use crate::evaluator::RuleEvaluator;
use crate::flight::FlightStore;
use crate::proximity::ProximityEngine;
use crate::report::{parse_report, ReportRejection};
use crate::stats;

/// How often (in stream-time seconds) the driver runs an expiration sweep.
pub const EXPIRY_SWEEP_INTERVAL_SECS: i64 = 30;

/// Tolerance for out-of-order reports: a report whose timestamp is more than this far
/// behind the last one processed for the stream is dropped rather than applied.
pub const REORDER_TOLERANCE_SECS: i64 = 60;

pub struct DriverLoop {
    store: FlightStore,
    rules: crate::rules::RuleSet,
    evaluator: RuleEvaluator,
    regions: crate::region::RegionSet,
    proximity: ProximityEngine,
    dispatcher: ActionDispatcher,
    last_sweep_at: Option<i64>,
    high_water_mark: Option<i64>,
}

impl DriverLoop {
    pub fn new(config: EngineConfig, dispatcher: ActionDispatcher, use_spatial_index: bool) -> Self {
        let mut evaluator = RuleEvaluator::new(config.lists, config.timezone);
        if use_spatial_index {
            evaluator = evaluator.with_spatial_index(&config.rules);
        }
        Self {
            store: FlightStore::new(config.expiry_secs),
            rules: config.rules,
            evaluator,
            regions: config.regions,
            proximity: ProximityEngine::new(REORDER_TOLERANCE_SECS),
            dispatcher,
            last_sweep_at: None,
            high_water_mark: None,
        }
    }

    /// Process one JSON ingest message. Returns `true` if it produced a report that was applied
    /// (used by the file-replay/test harness to count accepted vs. dropped input).
    pub fn ingest(&mut self, value: &Value, fallback_now: i64) -> bool {
        let report = match parse_report(value, fallback_now) {
            Ok(r) => r,
            Err(rejection) => {
                let reason = match rejection {
                    ReportRejection::MissingIdentifier => "missing_identifier",
                    ReportRejection::MissingPosition => "missing_position",
                    ReportRejection::NotJsonObject => "not_json_object",
                };
                debug!(reason, "dropped ingest message");
                stats::record_report_dropped(reason);
                return false;
            }
        };

        if let Some(high_water) = self.high_water_mark {
            if high_water - report.timestamp > REORDER_TOLERANCE_SECS {
                debug!(identifier = %report.identifier, ts = report.timestamp, high_water, "dropped out-of-order report");
                stats::record_report_dropped("out_of_order");
                return false;
            }
        }
        self.high_water_mark = Some(self.high_water_mark.map_or(report.timestamp, |hw| hw.max(report.timestamp)));

        let now = report.timestamp;
        let identifier = report.identifier.clone();
        self.store.update(report, &self.regions, self.rules.len());

        self.evaluator.process(
            &identifier,
            now,
            &mut self.store,
            &mut self.rules,
            &self.regions,
            &self.proximity,
            &mut self.dispatcher,
        );

        self.maybe_sweep(now);
        true
    }

    fn maybe_sweep(&mut self, now: i64) {
        let due = match self.last_sweep_at {
            None => true,
            Some(last) => now - last >= EXPIRY_SWEEP_INTERVAL_SECS,
        };
        if due {
            self.sweep(now);
            self.last_sweep_at = Some(now);
        }
    }

    fn sweep(&mut self, now: i64) {
        let dispatcher = &mut self.dispatcher;
        let evicted = self.store.expire(now, |flight| {
            let view: crate::flight::FlightView = flight.into();
            dispatcher.fire_expire_callbacks(&view, &flight.expire_callbacks);
            stats::record_expired_flight();
        });
        if evicted > 0 {
            debug!(count = evicted, "expiration sweep evicted flights");
        }
        stats::set_live_flight_count(self.store.len());
    }

    /// Terminal sweep on source exhaustion or cancellation: every remaining flight is evicted
    /// and its `expire_callback`s fire exactly once.
    fn final_sweep(&mut self) {
        let dispatcher = &mut self.dispatcher;
        let evicted = self.store.expire_all(|flight| {
            let view: crate::flight::FlightView = flight.into();
            dispatcher.fire_expire_callbacks(&view, &flight.expire_callbacks);
            stats::record_expired_flight();
        });
        info!(count = evicted, "final expiration sweep");
    }

    /// Run the loop to completion over `source`, a plain iterator of JSON ingest messages (a
    /// file-replay adapter is the typical source; live TCP/HTTP adapters are external
    /// collaborators that simply need to implement this same iterator contract).
    pub async fn run(mut self, mut source: impl Iterator<Item = Value>, cancel: CancellationToken, fallback_now: i64) {
        info!("driver loop starting");
        loop {
            if cancel.is_cancelled() {
                info!("cancellation observed between reports");
                break;
            }
            match source.next() {
                Some(value) => {
                    self.ingest(&value, fallback_now);
                }
                None => {
                    info!("report source exhausted");
                    break;
                }
            }
        }

        self.final_sweep();
        info!("driver loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn config_with(toml_src: &str, known_callbacks: &[&str]) -> EngineConfig {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, toml_src).unwrap();
        EngineConfig::load(&path, known_callbacks).unwrap()
    }

    #[test]
    fn ingest_path_applies_cooldown_state() {
        let config = config_with(
            r#"
            [config]
            kmls = []

            [rules.low]
            conditions = { max_alt = 1000, cooldown = 1 }
            actions = { track = true }
            "#,
            &[],
        );
        let mut driver = DriverLoop::new(config, ActionDispatcher::new(), false);

        driver.ingest(&json!({"hex": "N1", "lat": 40.0, "lon": -74.0, "alt_baro": 500, "now": 0}), 0);
        driver.ingest(&json!({"hex": "N1", "lat": 40.0, "lon": -74.0, "alt_baro": 500, "now": 30}), 0);
        driver.ingest(&json!({"hex": "N1", "lat": 40.0, "lon": -74.0, "alt_baro": 500, "now": 65}), 0);

        // cooldown behavior itself is covered in evaluator tests; this exercises the ingest path end to end
        assert_eq!(driver.store.len(), 1);
    }

    #[test]
    fn out_of_order_report_is_dropped() {
        let config = config_with(
            r#"
            [config]
            kmls = []
            "#,
            &[],
        );
        let mut driver = DriverLoop::new(config, ActionDispatcher::new(), false);
        assert!(driver.ingest(&json!({"hex": "N1", "lat": 0.0, "lon": 0.0, "now": 1000}), 0));
        assert!(!driver.ingest(&json!({"hex": "N1", "lat": 0.0, "lon": 0.0, "now": 100}), 0));
    }

    #[test]
    fn expiration_callback_fires_on_sweep() {
        let config = config_with(
            r#"
            [config]
            kmls = []
            expiry_secs = 600

            [rules.x]
            actions = { expire_callback = "gone_cb" }
            "#,
            &["gone_cb"],
        );
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired2 = fired.clone();
        let mut dispatcher = ActionDispatcher::new();
        dispatcher.register_callback("gone_cb", move |flight, _| {
            fired2.lock().unwrap().push(flight.identifier.clone());
        });
        let mut driver = DriverLoop::new(config, dispatcher, false);

        driver.ingest(&json!({"hex": "N1", "lat": 0.0, "lon": 0.0, "now": 0}), 0);
        driver.ingest(&json!({"hex": "N2", "lat": 0.0, "lon": 0.0, "now": 650}), 0);
        driver.ingest(&json!({"hex": "N2", "lat": 0.0, "lon": 0.0, "now": 680}), 0);

        assert_eq!(*fired.lock().unwrap(), vec!["N1".to_string()]);
    }
}
