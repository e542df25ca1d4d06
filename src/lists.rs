//! Named aircraft lists: literal identifier sets and prefix sets, referenced by rule conditions.

use std::collections::{HashMap, HashSet};

/// A single named list: either an exact-match set of identifiers or a set of prefixes any one
/// of which must match the start of the flight identifier.
#[derive(Debug, Clone)]
pub enum AircraftList {
    Exact(HashSet<String>),
    Prefix(Vec<String>),
}

impl AircraftList {
    pub fn exact(identifiers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AircraftList::Exact(identifiers.into_iter().map(|s| s.into().trim().to_uppercase()).collect())
    }

    pub fn prefix(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AircraftList::Prefix(prefixes.into_iter().map(|s| s.into().trim().to_uppercase()).collect())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        match self {
            AircraftList::Exact(set) => set.contains(identifier),
            AircraftList::Prefix(prefixes) => prefixes.iter().any(|p| identifier.starts_with(p.as_str())),
        }
    }
}

/// The full collection of named lists a rule set's `in_list` / `not_in_list` conditions can
/// reference by name.
#[derive(Debug, Clone, Default)]
pub struct AircraftListSet {
    lists: HashMap<String, AircraftList>,
}

impl AircraftListSet {
    pub fn new() -> Self {
        Self { lists: HashMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, list: AircraftList) {
        self.lists.insert(name.into(), list);
    }

    pub fn get(&self, name: &str) -> Option<&AircraftList> {
        self.lists.get(name)
    }

    pub fn contains_list(&self, name: &str) -> bool {
        self.lists.contains_key(name)
    }

    /// `true` if `identifier` is a member of the named list. An unknown list name is a
    /// configuration error caught at startup validation, not here; at evaluation time an
    /// unknown name is treated as non-membership so a malformed rule degrades rather than
    /// panics mid-stream.
    pub fn membership(&self, name: &str, identifier: &str) -> bool {
        self.lists.get(name).map(|l| l.contains(identifier)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_list_matches_case_insensitively() {
        let list = AircraftList::exact(["n123ab"]);
        assert!(list.contains("N123AB"));
        assert!(!list.contains("N999ZZ"));
    }

    #[test]
    fn prefix_list_matches_start() {
        let list = AircraftList::prefix(["N12", "AAL"]);
        assert!(list.contains("N12XYZ"));
        assert!(list.contains("AAL456"));
        assert!(!list.contains("UAL789"));
    }

    #[test]
    fn unknown_list_name_is_non_membership() {
        let lists = AircraftListSet::new();
        assert!(!lists.membership("ghost", "N1"));
    }

    #[test]
    fn set_tracks_membership_by_name() {
        let mut lists = AircraftListSet::new();
        lists.insert("watch", AircraftList::exact(["N1"]));
        assert!(lists.membership("watch", "N1"));
        assert!(!lists.membership("watch", "N2"));
    }
}
