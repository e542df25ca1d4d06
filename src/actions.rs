//! Resolves a matched rule's actions into effects: callbacks, prints, notes, tracked counters,
//! and fire-and-forget webhook/shell dispatch over a bounded worker queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tracing::{error, warn};

use crate::flight::{FlightStore, FlightView};
use crate::rules::{Action, Rule};
use crate::stats;

/// Default capacity of the webhook/shell dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default size of the webhook/shell worker pool. Action dispatch is rule-match-rate bound, not
/// report-rate bound, and a webhook/shell call is a single outbound request or process spawn per
/// item, so a small fixed pool is enough to keep the queue draining without oversubscribing.
pub const DEFAULT_WORKER_COUNT: usize = 8;

pub type CallbackFn = dyn Fn(&FlightView, Option<&FlightView>) + Send + Sync;

#[derive(Debug, Clone)]
pub enum WorkItem {
    Webhook { kind: String, target: String, rule: String, identifier: String },
    Shell { command: String, identifier: String },
}

/// Owns the registered user callbacks and the background queue for webhook/shell actions.
/// `print` output goes to a pluggable sink so tests and the CLI can both use it without a global.
pub struct ActionDispatcher {
    callbacks: HashMap<String, Arc<CallbackFn>>,
    expire_callbacks_fired: Vec<String>,
    sender: Option<flume::Sender<WorkItem>>,
    print_sink: Box<dyn FnMut(String) + Send>,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            expire_callbacks_fired: Vec::new(),
            sender: None,
            print_sink: Box::new(|line| println!("{line}")),
        }
    }

    pub fn with_print_sink(mut self, sink: impl FnMut(String) + Send + 'static) -> Self {
        self.print_sink = Box::new(sink);
        self
    }

    /// Register a handler under `name`. Both `callback` and `expire_callback` actions resolve
    /// through this registry; the second argument is `Some` only for proximity-rule matches.
    pub fn register_callback(&mut self, name: impl Into<String>, handler: impl Fn(&FlightView, Option<&FlightView>) + Send + Sync + 'static) {
        self.callbacks.insert(name.into(), Arc::new(handler));
    }

    pub fn registered_names(&self) -> Vec<&str> {
        self.callbacks.keys().map(|s| s.as_str()).collect()
    }

    /// Start the background worker pool consuming webhook/shell work items, bounded at
    /// `capacity`. Overflow is dropped with a log line and a counted metric.
    pub fn spawn_workers(&mut self, capacity: usize, worker_count: usize, handle: &tokio::runtime::Handle) {
        let (tx, rx) = flume::bounded(capacity);
        self.sender = Some(tx);
        for worker_id in 0..worker_count.max(1) {
            let rx = rx.clone();
            handle.spawn(async move {
                while let Ok(item) = rx.recv_async().await {
                    run_work_item(worker_id, item).await;
                }
            });
        }
    }

    /// Dispatch every action of a matched rule, in declared order. `store` allows `note` actions
    /// to mutate the matched flight's sticky-note map in place.
    pub fn dispatch(
        &mut self,
        rule: &Rule,
        flight: FlightView,
        partner: Option<FlightView>,
        store: &mut FlightStore,
        identifier: &str,
    ) {
        for action in &rule.actions {
            match action {
                Action::Callback(name) => self.run_callback(name, &flight, partner.as_ref()),
                Action::ExpireCallback(name) => {
                    // Registration only; the actual fire happens in `fire_expire_callbacks` when
                    // the flight store evicts the flight.
                    if let Some(f) = store.get_mut(identifier) {
                        if !f.expire_callbacks.iter().any(|n| n == name) {
                            f.expire_callbacks.push(name.clone());
                        }
                    }
                }
                Action::Print => {
                    (self.print_sink)(format_print_line(&rule.name, &flight));
                }
                Action::Note(value) => {
                    if let Some(f) = store.get_mut(identifier) {
                        match value {
                            Some(v) => {
                                f.notes.insert(rule.name.clone(), Some(v.clone()));
                            }
                            None => {
                                f.notes.remove(&rule.name);
                            }
                        }
                    }
                }
                Action::Track => {
                    stats::record_rule_match(&rule.name);
                }
                Action::Webhook { kind, target } => {
                    self.enqueue(WorkItem::Webhook {
                        kind: kind.clone(),
                        target: target.clone(),
                        rule: rule.name.clone(),
                        identifier: identifier.to_string(),
                    });
                }
                Action::Shell(template) => {
                    let command = expand_shell_template(template, &flight);
                    self.enqueue(WorkItem::Shell { command, identifier: identifier.to_string() });
                }
            }
        }
    }

    /// Fire every `expire_callback` registered on a flight being evicted. Called once per
    /// evicted flight, from the flight store's expiration sweep.
    pub fn fire_expire_callbacks(&mut self, flight: &FlightView, names: &[String]) {
        for name in names {
            self.run_callback(name, flight, None);
        }
    }

    fn run_callback(&mut self, name: &str, flight: &FlightView, partner: Option<&FlightView>) {
        let Some(handler) = self.callbacks.get(name).cloned() else {
            warn!(callback = name, "dispatch to unregistered callback (should have been caught at startup)");
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(flight, partner)));
        if result.is_err() {
            error!(callback = name, identifier = %flight.identifier, "callback panicked; swallowed");
            stats::record_action_failure("callback");
        }
    }

    fn enqueue(&mut self, item: WorkItem) {
        let Some(sender) = &self.sender else {
            warn!("webhook/shell dispatch requested but no worker pool is running; dropping");
            stats::record_dropped_action();
            return;
        };
        if sender.try_send(item).is_err() {
            warn!("action queue full, dropping work item");
            stats::record_dropped_action();
        }
    }
}

fn format_print_line(rule_name: &str, flight: &FlightView) -> String {
    let time = Utc
        .timestamp_opt(flight.timestamp, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| flight.timestamp.to_string());
    format!(
        "{time} rule={rule} id={id} alt={alt} track={track} gs={gs} lat={lat:.5} lon={lon:.5}",
        rule = rule_name,
        id = flight.identifier,
        alt = flight.alt_baro.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
        track = flight.track.map(|t| format!("{t:.0}")).unwrap_or_else(|| "-".to_string()),
        gs = flight.ground_speed.map(|g| format!("{g:.0}")).unwrap_or_else(|| "-".to_string()),
        lat = flight.lat,
        lon = flight.lon,
    )
}

fn expand_shell_template(template: &str, flight: &FlightView) -> String {
    template
        .replace("{flight_id}", &flight.identifier)
        .replace("{lat}", &flight.lat.to_string())
        .replace("{lon}", &flight.lon.to_string())
        .replace("{alt}", &flight.alt_baro.map(|a| a.to_string()).unwrap_or_default())
}

async fn run_work_item(worker_id: usize, item: WorkItem) {
    match item {
        WorkItem::Webhook { kind, target, rule, identifier } => {
            tracing::debug!(worker_id, %kind, %target, %rule, %identifier, "webhook dispatch (transport is an external collaborator)");
        }
        WorkItem::Shell { command, identifier } => {
            match tokio::process::Command::new("sh").arg("-c").arg(&command).output().await {
                Ok(output) if !output.status.success() => {
                    warn!(%identifier, status = ?output.status, "shell action exited non-zero");
                    stats::record_action_failure("shell");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(%identifier, error = %e, "shell action failed to spawn");
                    stats::record_action_failure("shell");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: &str) -> FlightView {
        FlightView {
            identifier: id.to_string(),
            timestamp: 0,
            lat: 1.0,
            lon: 2.0,
            alt_baro: Some(500),
            ground_speed: None,
            track: None,
            attrs: HashMap::new(),
            notes: HashMap::new(),
        }
    }

    #[test]
    fn shell_template_expands_flight_fields() {
        let expanded = expand_shell_template("notify {flight_id} at {alt}ft", &view("N1"));
        assert_eq!(expanded, "notify N1 at 500ft");
    }

    #[test]
    fn enqueue_without_workers_drops_silently() {
        let mut dispatcher = ActionDispatcher::new();
        dispatcher.enqueue(WorkItem::Shell { command: "true".into(), identifier: "N1".into() });
    }

    #[test]
    fn unregistered_callback_does_not_panic() {
        let mut dispatcher = ActionDispatcher::new();
        dispatcher.run_callback("ghost", &view("N1"), None);
    }
}
