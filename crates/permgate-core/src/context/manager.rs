use super::{ContextCalculator, ContextSet, SERVER_KEY};
use crate::host::HostSubject;
use crate::model::SubjectId;
use moka::sync::Cache;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Composes registered calculators into one context set per subject and
/// caches the result briefly.
pub struct ContextManager {
    calculators: RwLock<Vec<Arc<dyn ContextCalculator>>>,
    static_contexts: ContextSet,
    cache: Cache<SubjectId, ContextSet>,
}

impl ContextManager {
    pub fn new(server: Option<&str>, ttl: Duration) -> Self {
        let mut static_contexts = ContextSet::new();
        if let Some(server) = server {
            static_contexts.add(SERVER_KEY, server);
        }
        Self {
            calculators: RwLock::new(Vec::new()),
            static_contexts,
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn register_calculator(&self, calculator: Arc<dyn ContextCalculator>) {
        self.calculators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(calculator);
        self.cache.invalidate_all();
    }

    pub fn static_contexts(&self) -> &ContextSet {
        &self.static_contexts
    }

    /// Current contexts of an online subject (cached).
    pub fn contexts_for(&self, subject: &dyn HostSubject) -> ContextSet {
        self.cache
            .get_with(subject.id(), || self.calculate(subject))
    }

    /// Computes a fresh set, bypassing the cache.
    pub fn calculate(&self, subject: &dyn HostSubject) -> ContextSet {
        let mut set = self.static_contexts.clone();
        let calculators = self.calculators.read().unwrap_or_else(|e| e.into_inner());
        for calculator in calculators.iter() {
            calculator.calculate(subject, &mut set);
        }
        set
    }

    pub fn estimate_potential_contexts(&self) -> ContextSet {
        let mut set = self.static_contexts.clone();
        let calculators = self.calculators.read().unwrap_or_else(|e| e.into_inner());
        for calculator in calculators.iter() {
            set.extend(&calculator.estimate_potential_contexts());
        }
        set
    }

    /// Drops the cached set, e.g. after the subject changed zone.
    pub fn invalidate(&self, id: SubjectId) {
        self.cache.invalidate(&id);
    }

    pub fn on_subject_quit(&self, id: SubjectId) {
        self.invalidate(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextConsumer, ZONE_KEY};
    use crate::delegate::testing::native;
    use crate::delegate::{DelegateSlot, SharedSlot};
    use crate::tristate::Tristate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Subject {
        id: SubjectId,
        zone: Mutex<String>,
        slot: SharedSlot,
    }

    impl Subject {
        fn new(name: &str, zone: &str) -> Self {
            Self {
                id: SubjectId::offline(name),
                zone: Mutex::new(zone.to_string()),
                slot: SharedSlot::new(name, native(Tristate::Undefined)),
            }
        }
    }

    impl HostSubject for Subject {
        fn id(&self) -> SubjectId {
            self.id
        }
        fn name(&self) -> String {
            "subject".to_string()
        }
        fn zone(&self) -> String {
            self.zone.lock().unwrap().clone()
        }
        fn is_elevated(&self) -> bool {
            false
        }
        fn set_elevated(&self, _value: bool) {}
        fn delegate_slot(&self) -> &dyn DelegateSlot {
            &self.slot
        }
    }

    #[derive(Default)]
    struct CountingZone(AtomicUsize);

    impl ContextCalculator for CountingZone {
        fn calculate(&self, subject: &dyn HostSubject, consumer: &mut dyn ContextConsumer) {
            self.0.fetch_add(1, Ordering::SeqCst);
            consumer.accept(ZONE_KEY, &subject.zone());
        }
    }

    #[test]
    fn test_static_server_context_is_always_present() {
        let manager = ContextManager::new(Some("Lobby"), Duration::from_secs(60));
        let set = manager.calculate(&Subject::new("a", "world"));
        assert!(set.contains(SERVER_KEY, "lobby"));
        assert!(manager.estimate_potential_contexts().contains(SERVER_KEY, "lobby"));
    }

    #[test]
    fn test_cached_until_invalidated() {
        let manager = ContextManager::new(None, Duration::from_secs(60));
        let counter = Arc::new(CountingZone::default());
        manager.register_calculator(counter.clone());

        let subject = Subject::new("a", "world");
        assert!(manager.contexts_for(&subject).contains(ZONE_KEY, "world"));
        *subject.zone.lock().unwrap() = "nether".to_string();
        assert!(manager.contexts_for(&subject).contains(ZONE_KEY, "world"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        manager.invalidate(subject.id);
        assert!(manager.contexts_for(&subject).contains(ZONE_KEY, "nether"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
