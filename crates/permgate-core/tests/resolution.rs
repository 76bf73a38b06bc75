use permgate_core::context::{ContextManager, ContextSet, ZoneCalculator, SERVER_KEY, ZONE_KEY};
use permgate_core::delegate::{CheckDelegate, DelegateSlot, SharedSlot};
use permgate_core::host::{HostSubject, ZoneDirectory};
use permgate_core::processor::{
    DefaultPermissionMap, PermissionDefault, PermissionRegistry, RegisteredPermission,
};
use permgate_core::resolver::{MokaResolutionCache, Resolver};
use permgate_core::tristate::ResultFactory;
use permgate_core::{PermissionNode, SubjectData, SubjectId, Tristate, TristateResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Native;

impl CheckDelegate for Native {
    fn check(&self, _permission: &str) -> TristateResult {
        ResultFactory::new("native", "host").result(Tristate::Undefined)
    }
}

struct Subject {
    id: SubjectId,
    zone: Mutex<String>,
    elevated: Mutex<bool>,
    slot: SharedSlot,
}

impl Subject {
    fn new(name: &str, zone: &str) -> Self {
        Self {
            id: SubjectId::offline(name),
            zone: Mutex::new(zone.to_string()),
            elevated: Mutex::new(false),
            slot: SharedSlot::new(name, Arc::new(Native)),
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
        *self.elevated.lock().unwrap()
    }
    fn set_elevated(&self, value: bool) {
        *self.elevated.lock().unwrap() = value;
    }
    fn delegate_slot(&self) -> &dyn DelegateSlot {
        &self.slot
    }
}

struct Zones(Vec<&'static str>);

impl ZoneDirectory for Zones {
    fn zones(&self) -> Vec<String> {
        self.0.iter().map(|z| z.to_string()).collect()
    }
}

fn manager(rewrites: &[(&str, &str)]) -> ContextManager {
    let rewrites: HashMap<String, String> = rewrites
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    let manager = ContextManager::new(Some("lobby"), Duration::from_secs(60));
    manager.register_calculator(Arc::new(ZoneCalculator::new(
        &rewrites,
        Arc::new(Zones(vec!["world", "nether_cave"])),
    )));
    manager
}

fn resolver() -> Resolver {
    let defaults = Arc::new(DefaultPermissionMap::new());
    defaults.set(false, "chat.color", true);
    let registry = Arc::new(PermissionRegistry::new());
    registry.register(RegisteredPermission {
        name: "server.stop".to_string(),
        default: PermissionDefault::Elevated,
        description: None,
    });
    Resolver::with_capacity(defaults, registry, 64)
}

#[test]
fn test_rewritten_zone_satisfies_contextual_node() {
    let manager = manager(&[("nether_cave", "nether")]);
    let subject = Subject::new("alice", "nether_cave");
    let contexts = manager.contexts_for(&subject);
    assert!(contexts.contains(ZONE_KEY, "nether_cave"));
    assert!(contexts.contains(ZONE_KEY, "nether"));
    assert!(contexts.contains(SERVER_KEY, "lobby"));

    let data = SubjectData::new(subject.id, "alice")
        .with_node(PermissionNode::new("fly", false))
        .with_node(PermissionNode::new("fly", true).with_context(ZONE_KEY, "nether"));

    let resolver = resolver();
    assert_eq!(resolver.resolve(&data, &contexts, false, "FLY").verdict(), Tristate::Allow);

    let mut world = ContextSet::new();
    world.add(ZONE_KEY, "world");
    assert_eq!(resolver.resolve(&data, &world, false, "fly").verdict(), Tristate::Deny);
}

#[test]
fn test_defaults_answer_when_subject_has_no_node() {
    let resolver = resolver();
    let data = SubjectData::new(SubjectId::offline("bob"), "bob");
    let ctx = ContextSet::new();

    let color = resolver.resolve(&data, &ctx, false, "chat.color");
    assert_eq!(color.verdict(), Tristate::Allow);
    assert_ne!(color.processor(), Some("assigned"));

    assert_eq!(resolver.resolve(&data, &ctx, false, "server.stop").verdict(), Tristate::Deny);
    assert_eq!(resolver.resolve(&data, &ctx, true, "server.stop").verdict(), Tristate::Allow);
    assert_eq!(resolver.resolve(&data, &ctx, false, "  "), TristateResult::UNDEFINED);
    assert_eq!(resolver.resolve(&data, &ctx, false, "unknown.node"), TristateResult::UNDEFINED);
}

#[test]
fn test_invalidation_picks_up_new_nodes() {
    let cache = Arc::new(MokaResolutionCache::new(64));
    let resolver = Resolver::new(
        Arc::new(DefaultPermissionMap::new()),
        Arc::new(PermissionRegistry::new()),
        cache.clone(),
    );
    let ctx = ContextSet::new();
    let before = SubjectData::new(SubjectId::offline("carol"), "carol");
    assert_eq!(resolver.resolve(&before, &ctx, false, "fly").verdict(), Tristate::Undefined);

    // same key: the cached chain still answers from the old nodes
    let after = before.clone().with_node(PermissionNode::new("fly", true));
    assert_eq!(resolver.resolve(&after, &ctx, false, "fly").verdict(), Tristate::Undefined);

    resolver.invalidate(after.id);
    assert_eq!(resolver.resolve(&after, &ctx, false, "fly").verdict(), Tristate::Allow);
    assert_eq!(cache.entry_count(), 1);
}

#[test]
fn test_zone_change_needs_context_invalidation() {
    let manager = manager(&[]);
    let subject = Subject::new("dave", "world");
    assert!(manager.contexts_for(&subject).contains(ZONE_KEY, "world"));

    *subject.zone.lock().unwrap() = "nether_cave".to_string();
    manager.invalidate(subject.id);
    let contexts = manager.contexts_for(&subject);
    assert!(contexts.contains(ZONE_KEY, "nether_cave"));
    assert!(!contexts.contains(ZONE_KEY, "world"));

    let potential = manager.estimate_potential_contexts();
    assert!(potential.contains(ZONE_KEY, "world"));
    assert!(potential.contains(ZONE_KEY, "nether_cave"));
    assert!(potential.contains(SERVER_KEY, "lobby"));
}
