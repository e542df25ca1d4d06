//! Rule configuration: parsing the TOML rule document into a compiled, validated `RuleSet`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::errors::{ConfigError, ConfigResult};
use crate::lists::AircraftListSet;

/// One AND-ed condition. `regions`/`transition_regions` carry region names directly; they are
/// matched against a flight's resolved `current_regions`/`previous_regions` at evaluation time,
/// not validated against a particular region file up front.
#[derive(Debug, Clone)]
pub enum Condition {
    MinAlt(i32),
    MaxAlt(i32),
    AircraftList(String),
    ExcludeAircraftList(String),
    ExcludeAircraftSubstrs(Vec<String>),
    Regions(Vec<Option<String>>),
    TransitionRegions(Option<String>, Option<String>),
    ChangedRegions,
    LatLongRing { nm: f64, lat: f64, lon: f64 },
    Proximity { alt_ft: i32, lat_nm: f64 },
    HasAttr(String),
    MinTime(u32),
    MaxTime(u32),
}

/// One action, in declared order. Dispatch de-duplicates by *kind* within a rule (last wins);
/// that de-duplication happens in `Rule::compile`, not here.
#[derive(Debug, Clone)]
pub enum Action {
    Callback(String),
    ExpireCallback(String),
    Print,
    Note(Option<String>),
    Track,
    Webhook { kind: String, target: String },
    Shell(String),
}

fn action_kind_tag(a: &Action) -> u8 {
    match a {
        Action::Callback(_) => 0,
        Action::ExpireCallback(_) => 1,
        Action::Print => 2,
        Action::Note(_) => 3,
        Action::Track => 4,
        Action::Webhook { .. } => 5,
        Action::Shell(_) => 6,
    }
}

/// A compiled rule: stable `index` into every flight's dense cooldown vector, AND-ed conditions,
/// de-duplicated ordered actions, and the two cooldown durations.
#[derive(Debug, Clone)]
pub struct Rule {
    pub index: usize,
    pub name: String,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub cooldown_flight_secs: i64,
    pub cooldown_rule_secs: i64,
    pub last_rule_fire_ts: Option<i64>,
}

impl Rule {
    /// Keep only the last-declared action of each kind, preserving its original relative order
    /// among the kept kinds (the table in the config is the source of truth for ordering).
    fn dedup_actions(actions: Vec<Action>) -> Vec<Action> {
        let mut last_index_for_kind: HashMap<u8, usize> = HashMap::new();
        for (i, a) in actions.iter().enumerate() {
            last_index_for_kind.insert(action_kind_tag(a), i);
        }
        let mut kept: Vec<(usize, Action)> = actions
            .into_iter()
            .enumerate()
            .filter(|(i, a)| last_index_for_kind.get(&action_kind_tag(a)) == Some(i))
            .collect();
        kept.sort_by_key(|(i, _)| *i);
        kept.into_iter().map(|(_, a)| a).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Rule> {
        self.rules.get_mut(index)
    }
}

// --- TOML config schema ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub config: RawEngineConfig,
    #[serde(default)]
    pub aircraft_lists: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub rules: HashMap<String, RawRule>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    #[serde(default)]
    pub kmls: Vec<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub expiry_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    #[serde(default)]
    pub conditions: RawConditions,
    #[serde(default)]
    pub actions: RawActions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConditions {
    pub min_alt: Option<i32>,
    pub max_alt: Option<i32>,
    pub aircraft_list: Option<String>,
    pub exclude_aircraft_list: Option<String>,
    pub exclude_aircraft_substrs: Option<Vec<String>>,
    pub regions: Option<Vec<Option<String>>>,
    pub transition_regions: Option<(Option<String>, Option<String>)>,
    pub changed_regions: Option<bool>,
    pub latlongring: Option<(f64, f64, f64)>,
    pub proximity: Option<(i32, f64)>,
    pub cooldown: Option<i64>,
    pub rule_cooldown: Option<i64>,
    pub has_attr: Option<String>,
    pub min_time: Option<u32>,
    pub max_time: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawActions {
    pub callback: Option<String>,
    pub expire_callback: Option<String>,
    pub print: Option<bool>,
    pub note: Option<serde_json::Value>,
    pub track: Option<bool>,
    pub webhook: Option<(String, String)>,
    pub shell: Option<String>,
}

const CONDITION_KEYS: &[&str] = &[
    "min_alt",
    "max_alt",
    "aircraft_list",
    "exclude_aircraft_list",
    "exclude_aircraft_substrs",
    "regions",
    "transition_regions",
    "changed_regions",
    "latlongring",
    "proximity",
    "cooldown",
    "rule_cooldown",
    "has_attr",
    "min_time",
    "max_time",
];

const ACTION_KEYS: &[&str] =
    &["callback", "expire_callback", "print", "note", "track", "webhook", "shell"];

/// Walk the raw TOML document's `rules.*.conditions`/`rules.*.actions` tables and reject any key
/// outside the known sets, with the offending rule and key named precisely. This runs ahead of
/// the typed `RawConfig` parse so a misspelled key (`min_altt`) produces a specific diagnostic
/// rather than `serde`'s generic "unknown field" error.
pub fn validate_known_keys(raw: &toml::Value) -> ConfigResult<()> {
    let Some(rules) = raw.get("rules").and_then(|v| v.as_table()) else {
        return Ok(());
    };

    for (rule_name, rule) in rules {
        if let Some(conditions) = rule.get("conditions").and_then(|v| v.as_table()) {
            for key in conditions.keys() {
                if !CONDITION_KEYS.contains(&key.as_str()) {
                    return Err(ConfigError::UnknownCondition {
                        rule: rule_name.clone(),
                        key: key.clone(),
                    });
                }
            }
        }
        if let Some(actions) = rule.get("actions").and_then(|v| v.as_table()) {
            for key in actions.keys() {
                if !ACTION_KEYS.contains(&key.as_str()) {
                    return Err(ConfigError::UnknownAction { rule: rule_name.clone(), key: key.clone() });
                }
            }
        }
    }

    Ok(())
}

/// Validate and compile a parsed TOML document into a `RuleSet` and the `AircraftListSet` it
/// references. `known_callbacks` is the set of names registered with the dispatcher before load;
/// an action naming an unregistered callback is a startup error.
pub fn compile(
    raw: RawConfig,
    known_callbacks: &[&str],
) -> ConfigResult<(RuleSet, AircraftListSet)> {
    let mut lists = AircraftListSet::new();
    for (name, idents) in raw.aircraft_lists {
        lists.insert(name, crate::lists::AircraftList::exact(idents));
    }

    let mut rules = Vec::with_capacity(raw.rules.len());
    // Deterministic order: TOML tables parse into a HashMap, so sort by name for stable,
    // reproducible rule indices across runs of the same config file.
    let mut names: Vec<&String> = raw.rules.keys().collect();
    names.sort();

    for (index, name) in names.into_iter().enumerate() {
        let raw_rule = &raw.rules[name];
        let conditions = compile_conditions(name, &raw_rule.conditions, &lists)?;
        let actions = compile_actions(name, &raw_rule.actions, known_callbacks)?;

        if conditions.iter().any(|c| matches!(c, Condition::Regions(_)))
            && conditions.iter().any(|c| matches!(c, Condition::TransitionRegions(_, _)))
        {
            tracing::warn!(rule = %name, "rule declares both regions and transition_regions; they are AND-ed");
        }

        rules.push(Rule {
            index,
            name: name.clone(),
            actions: Rule::dedup_actions(actions),
            conditions,
            cooldown_flight_secs: raw_rule.conditions.cooldown.unwrap_or(0) * 60,
            cooldown_rule_secs: raw_rule.conditions.rule_cooldown.unwrap_or(0) * 60,
            last_rule_fire_ts: None,
        });
    }

    Ok((RuleSet { rules }, lists))
}

fn compile_conditions(
    rule_name: &str,
    raw: &RawConditions,
    lists: &AircraftListSet,
) -> ConfigResult<Vec<Condition>> {
    let mut out = Vec::new();

    if let Some(a) = raw.min_alt {
        out.push(Condition::MinAlt(a));
    }
    if let Some(a) = raw.max_alt {
        out.push(Condition::MaxAlt(a));
    }
    if let Some(list) = &raw.aircraft_list {
        require_list(rule_name, list, lists)?;
        out.push(Condition::AircraftList(list.clone()));
    }
    if let Some(list) = &raw.exclude_aircraft_list {
        require_list(rule_name, list, lists)?;
        out.push(Condition::ExcludeAircraftList(list.clone()));
    }
    if let Some(substrs) = &raw.exclude_aircraft_substrs {
        out.push(Condition::ExcludeAircraftSubstrs(substrs.clone()));
    }
    if let Some(names) = &raw.regions {
        out.push(Condition::Regions(names.clone()));
    }
    if let Some((from, to)) = &raw.transition_regions {
        out.push(Condition::TransitionRegions(from.clone(), to.clone()));
    }
    if raw.changed_regions == Some(true) {
        out.push(Condition::ChangedRegions);
    }
    if let Some((nm, lat, lon)) = raw.latlongring {
        out.push(Condition::LatLongRing { nm, lat, lon });
    }
    if let Some((alt_ft, lat_nm)) = raw.proximity {
        out.push(Condition::Proximity { alt_ft, lat_nm });
    }
    if let Some(name) = &raw.has_attr {
        out.push(Condition::HasAttr(name.clone()));
    }
    if let Some(t) = raw.min_time {
        out.push(Condition::MinTime(t));
    }
    if let Some(t) = raw.max_time {
        out.push(Condition::MaxTime(t));
    }

    Ok(out)
}

fn require_list(rule_name: &str, list: &str, lists: &AircraftListSet) -> ConfigResult<()> {
    if lists.contains_list(list) {
        Ok(())
    } else {
        Err(ConfigError::UnknownList { rule: rule_name.to_string(), list: list.to_string() })
    }
}

fn compile_actions(rule_name: &str, raw: &RawActions, known_callbacks: &[&str]) -> ConfigResult<Vec<Action>> {
    let mut out = Vec::new();

    if let Some(name) = &raw.callback {
        require_callback(rule_name, name, known_callbacks)?;
        out.push(Action::Callback(name.clone()));
    }
    if let Some(name) = &raw.expire_callback {
        require_callback(rule_name, name, known_callbacks)?;
        out.push(Action::ExpireCallback(name.clone()));
    }
    if raw.print == Some(true) {
        out.push(Action::Print);
    }
    if let Some(v) = &raw.note {
        let note = match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => return Err(ConfigError::InvalidCondition {
                rule: rule_name.to_string(),
                key: "note".to_string(),
                reason: format!("expected string or null, got {other}"),
            }),
        };
        out.push(Action::Note(note));
    }
    if raw.track == Some(true) {
        out.push(Action::Track);
    }
    if let Some((kind, target)) = &raw.webhook {
        out.push(Action::Webhook { kind: kind.clone(), target: target.clone() });
    }
    if let Some(cmd) = &raw.shell {
        out.push(Action::Shell(cmd.clone()));
    }

    Ok(out)
}

fn require_callback(rule_name: &str, name: &str, known_callbacks: &[&str]) -> ConfigResult<()> {
    if known_callbacks.contains(&name) {
        Ok(())
    } else {
        Err(ConfigError::UnregisteredCallback { rule: rule_name.to_string(), name: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> RawConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn compiles_minimal_rule() {
        let raw = parse(
            r#"
            [rules.low]
            conditions = { max_alt = 1000 }
            actions = { print = true }
            "#,
        );
        let (rules, _) = compile(raw, &[]).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = rules.get(0).unwrap();
        assert_eq!(rule.name, "low");
        assert!(matches!(rule.conditions[0], Condition::MaxAlt(1000)));
    }

    #[test]
    fn unknown_list_is_rejected() {
        let raw = parse(
            r#"
            [rules.r1]
            conditions = { aircraft_list = "ghost" }
            "#,
        );
        let err = compile(raw, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownList { .. }));
    }

    #[test]
    fn unregistered_callback_is_rejected() {
        let raw = parse(
            r#"
            [rules.r1]
            actions = { callback = "ghost_cb" }
            "#,
        );
        let err = compile(raw, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::UnregisteredCallback { .. }));
    }

    #[test]
    fn registered_callback_is_accepted() {
        let raw = parse(
            r#"
            [rules.r1]
            actions = { callback = "takeoff_cb" }
            "#,
        );
        let (rules, _) = compile(raw, &["takeoff_cb"]).unwrap();
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn actions_dedup_keeps_last_of_each_kind() {
        let actions = vec![Action::Note(Some("a".into())), Action::Print, Action::Note(Some("b".into()))];
        let deduped = Rule::dedup_actions(actions);
        assert_eq!(deduped.len(), 2);
        assert!(matches!(&deduped[0], Action::Print));
        assert!(matches!(&deduped[1], Action::Note(Some(s)) if s == "b"));
    }

    #[test]
    fn validate_known_keys_accepts_well_formed_rule() {
        let raw: toml::Value = toml::from_str(
            r#"
            [rules.r1]
            conditions = { max_alt = 1000 }
            actions = { print = true }
            "#,
        )
        .unwrap();
        assert!(validate_known_keys(&raw).is_ok());
    }

    #[test]
    fn validate_known_keys_rejects_unknown_condition() {
        let raw: toml::Value = toml::from_str(
            r#"
            [rules.r1]
            conditions = { min_altt = 1000 }
            "#,
        )
        .unwrap();
        let err = validate_known_keys(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCondition { rule, key } if rule == "r1" && key == "min_altt"));
    }

    #[test]
    fn validate_known_keys_rejects_unknown_action() {
        let raw: toml::Value = toml::from_str(
            r#"
            [rules.r1]
            actions = { prnit = true }
            "#,
        )
        .unwrap();
        let err = validate_known_keys(&raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAction { rule, key } if rule == "r1" && key == "prnit"));
    }

    #[test]
    fn rules_are_ordered_by_name() {
        let raw = parse(
            r#"
            [rules.bbb]
            [rules.aaa]
            "#,
        );
        let (rules, _) = compile(raw, &[]).unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["aaa", "bbb"]);
    }
}
