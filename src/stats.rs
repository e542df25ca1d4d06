//! Thin wrapper over the process-wide statistics interface. Backed by the `metrics` facade so
//! whatever exporter the host process installs (Prometheus, statsd, ...) receives these series.

use metrics::{counter, gauge};

pub fn record_report_dropped(reason: &'static str) {
    counter!("skyrules_reports_dropped_total", "reason" => reason).increment(1);
}

pub fn record_rule_match(rule_name: &str) {
    counter!("skyrules_rule_matches_total", "rule" => rule_name.to_string()).increment(1);
}

pub fn record_action_failure(action_kind: &'static str) {
    counter!("skyrules_action_failures_total", "kind" => action_kind).increment(1);
}

pub fn record_dropped_action() {
    counter!("skyrules_actions_dropped_total").increment(1);
}

pub fn record_expired_flight() {
    counter!("skyrules_flights_expired_total").increment(1);
}

pub fn set_live_flight_count(count: usize) {
    gauge!("skyrules_live_flights").set(count as f64);
}
