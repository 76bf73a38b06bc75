use super::{ContextCalculator, ContextConsumer, ContextSet};
use crate::host::{HostSubject, ZoneDirectory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const ZONE_KEY: &str = "zone";

/// Emits the subject's current zone, following configured rewrites.
///
/// A rewrite target that was already visited in this calculation ends the
/// walk, so misconfigured cycles terminate and the first value is always
/// emitted.
pub struct ZoneCalculator {
    rewrites: HashMap<String, String>,
    directory: Arc<dyn ZoneDirectory>,
}

impl ZoneCalculator {
    pub fn new(rewrites: &HashMap<String, String>, directory: Arc<dyn ZoneDirectory>) -> Self {
        let rewrites = rewrites
            .iter()
            .map(|(from, to)| (from.trim().to_lowercase(), to.trim().to_lowercase()))
            .collect();
        Self {
            rewrites,
            directory,
        }
    }

    /// The full sequence of values emitted for a raw zone name.
    pub fn rewrite_chain(&self, zone: &str) -> Vec<String> {
        let mut chain = Vec::new();
        self.walk(zone, |z| chain.push(z.to_string()));
        chain
    }

    fn walk(&self, zone: &str, mut emit: impl FnMut(&str)) {
        let mut seen = HashSet::new();
        let mut current = zone.trim().to_lowercase();
        while seen.insert(current.clone()) {
            emit(&current);
            match self.rewrites.get(&current) {
                Some(next) => current = next.clone(),
                None => break,
            }
        }
    }
}

impl ContextCalculator for ZoneCalculator {
    fn calculate(&self, subject: &dyn HostSubject, consumer: &mut dyn ContextConsumer) {
        self.walk(&subject.zone(), |z| consumer.accept(ZONE_KEY, z));
    }

    fn estimate_potential_contexts(&self) -> ContextSet {
        let mut set = ContextSet::new();
        for zone in self.directory.zones() {
            let name = zone.trim().to_lowercase();
            if !name.is_empty() {
                set.add(ZONE_KEY, &name);
            }
        }
        set
    }
}
