//! Context sets and the calculators that populate them.
//!
//! Calculators push pairs into a [`ContextConsumer`] instead of returning a
//! collection so several of them compose into one set without reallocation.

mod manager;
mod zone;

pub use manager::ContextManager;
pub use zone::{ZoneCalculator, ZONE_KEY};

use crate::host::HostSubject;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key of the static context added when a server name is configured.
pub const SERVER_KEY: &str = "server";

/// Ordered multimap of context key to values. Keys and values are trimmed
/// and lower-cased on insert; empty keys or values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(from = "BTreeMap<String, BTreeSet<String>>")]
pub struct ContextSet {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pair; returns `false` if it was already present or rejected.
    pub fn add(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim().to_lowercase();
        let value = value.trim().to_lowercase();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.entries.entry(key).or_default().insert(value)
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.entries
            .get(&key.to_lowercase())
            .is_some_and(|values| values.contains(&value.to_lowercase()))
    }

    pub fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.entries
            .get(&key.to_lowercase())
            .into_iter()
            .flat_map(|values| values.iter().map(String::as_str))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: &ContextSet) {
        for (k, v) in other.iter() {
            self.add(k, v);
        }
    }

    /// True when, for every key required here, `other` holds at least one of
    /// the required values. The empty set is satisfied by anything.
    pub fn is_satisfied_by(&self, other: &ContextSet) -> bool {
        self.entries.iter().all(|(key, required)| {
            other
                .entries
                .get(key)
                .is_some_and(|present| required.iter().any(|v| present.contains(v)))
        })
    }
}

impl From<BTreeMap<String, BTreeSet<String>>> for ContextSet {
    fn from(raw: BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut set = ContextSet::new();
        for (key, values) in &raw {
            for value in values {
                set.add(key, value);
            }
        }
        set
    }
}

impl Serialize for ContextSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("{")?;
        for (k, v) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Push-style sink for calculated contexts.
pub trait ContextConsumer {
    fn accept(&mut self, key: &str, value: &str);
}

impl ContextConsumer for ContextSet {
    fn accept(&mut self, key: &str, value: &str) {
        self.add(key, value);
    }
}

/// Derives environment attributes for a subject.
pub trait ContextCalculator: Send + Sync {
    fn calculate(&self, subject: &dyn HostSubject, consumer: &mut dyn ContextConsumer);

    /// Best-effort enumeration of every value this calculator could produce,
    /// for offline lookup tooling. Never fails; may be empty.
    fn estimate_potential_contexts(&self) -> ContextSet {
        ContextSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_normalizes_and_dedups() {
        let mut set = ContextSet::new();
        assert!(set.add("Zone", " Nether "));
        assert!(!set.add("zone", "nether"));
        assert!(!set.add("", "x"));
        assert!(!set.add("zone", "  "));
        assert!(set.contains("ZONE", "NETHER"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_multimap_keeps_several_values_per_key() {
        let mut set = ContextSet::new();
        set.add("zone", "world_nether");
        set.add("zone", "nether");
        assert_eq!(set.values("zone").collect::<Vec<_>>(), ["nether", "world_nether"]);
    }

    #[test]
    fn test_satisfaction_requires_one_value_per_key() {
        let mut required = ContextSet::new();
        required.add("zone", "nether");
        required.add("zone", "end");
        required.add("server", "lobby");

        let mut present = ContextSet::new();
        present.add("zone", "end");
        assert!(!required.is_satisfied_by(&present));

        present.add("server", "lobby");
        assert!(required.is_satisfied_by(&present));
        assert!(ContextSet::new().is_satisfied_by(&present));
    }

    #[test]
    fn test_yaml_round_trip_as_map() {
        let set: ContextSet = serde_yaml::from_str("Zone: [Nether]").unwrap();
        assert!(set.contains("zone", "nether"));
        let yaml = serde_yaml::to_string(&set).unwrap();
        assert!(yaml.contains("zone"));
    }

    #[test]
    fn test_display() {
        let mut set = ContextSet::new();
        set.add("server", "lobby");
        set.add("zone", "world");
        assert_eq!(set.to_string(), "{server=lobby, zone=world}");
    }
}
