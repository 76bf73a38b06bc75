//! The host's built-in default permission sources.
//!
//! Both registries are owned values shared by `Arc`, passed into processors at
//! construction. Lookups are single hash-map reads.

use super::PermissionProcessor;
use crate::tristate::{ResultFactory, Tristate, TristateResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const DEFAULT_PERMISSION_MAP: ResultFactory =
    ResultFactory::new("defaults", "default permission map");
const PERMISSION_MAP: ResultFactory = ResultFactory::new("defaults", "permission map");

/// Permissions the host grants implicitly, split by elevated status.
#[derive(Debug, Default)]
pub struct DefaultPermissionMap {
    elevated: RwLock<HashMap<String, bool>>,
    regular: RwLock<HashMap<String, bool>>,
}

impl DefaultPermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_maps(elevated: HashMap<String, bool>, regular: HashMap<String, bool>) -> Self {
        let lower = |m: HashMap<String, bool>| {
            m.into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect::<HashMap<_, _>>()
        };
        Self {
            elevated: RwLock::new(lower(elevated)),
            regular: RwLock::new(lower(regular)),
        }
    }

    pub fn set(&self, elevated: bool, permission: &str, value: bool) {
        self.side(elevated)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(permission.to_lowercase(), value);
    }

    pub fn remove(&self, elevated: bool, permission: &str) {
        self.side(elevated)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&permission.to_lowercase());
    }

    pub fn lookup(&self, permission: &str, elevated: bool) -> Tristate {
        self.side(elevated)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(permission)
            .copied()
            .into()
    }

    fn side(&self, elevated: bool) -> &RwLock<HashMap<String, bool>> {
        if elevated {
            &self.elevated
        } else {
            &self.regular
        }
    }
}

/// Static default declared by whoever registered a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDefault {
    True,
    False,
    Elevated,
    NotElevated,
}

impl PermissionDefault {
    pub fn value(self, elevated: bool) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Elevated => elevated,
            Self::NotElevated => !elevated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPermission {
    pub name: String,
    pub default: PermissionDefault,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Every permission registered with the host, keyed by lower-cased name.
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    permissions: RwLock<HashMap<String, RegisteredPermission>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a permission; an existing registration is kept and `false`
    /// returned.
    pub fn register(&self, permission: RegisteredPermission) -> bool {
        let key = permission.name.to_lowercase();
        let mut map = self.permissions.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, permission);
        true
    }

    pub fn unregister(&self, name: &str) -> Option<RegisteredPermission> {
        self.permissions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<RegisteredPermission> {
        self.permissions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name.to_lowercase())
            .cloned()
    }

    pub fn default_value(&self, name: &str, elevated: bool) -> Tristate {
        self.permissions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|p| Tristate::from_bool(p.default.value(elevated)))
            .unwrap_or(Tristate::Undefined)
    }

    pub fn len(&self) -> usize {
        self.permissions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default-permission map first, then the registry default; both resolved
/// against the subject's elevated status.
#[derive(Debug)]
pub struct DefaultsProcessor {
    defaults: Arc<DefaultPermissionMap>,
    registry: Arc<PermissionRegistry>,
    elevated: bool,
}

impl DefaultsProcessor {
    pub fn new(
        defaults: Arc<DefaultPermissionMap>,
        registry: Arc<PermissionRegistry>,
        elevated: bool,
    ) -> Self {
        Self {
            defaults,
            registry,
            elevated,
        }
    }
}

impl PermissionProcessor for DefaultsProcessor {
    fn has_permission(&self, permission: &str) -> TristateResult {
        let t = self.defaults.lookup(permission, self.elevated);
        if t.is_defined() {
            return DEFAULT_PERMISSION_MAP.result(t);
        }
        PERMISSION_MAP.result(self.registry.default_value(permission, self.elevated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<PermissionRegistry> {
        let registry = PermissionRegistry::new();
        registry.register(RegisteredPermission {
            name: "Admin.Kick".to_string(),
            default: PermissionDefault::Elevated,
            description: None,
        });
        registry.register(RegisteredPermission {
            name: "chat".to_string(),
            default: PermissionDefault::True,
            description: Some("talk".to_string()),
        });
        Arc::new(registry)
    }

    #[test]
    fn test_default_map_wins_over_registry() {
        let defaults = Arc::new(DefaultPermissionMap::new());
        defaults.set(false, "chat", false);
        let processor = DefaultsProcessor::new(defaults, registry(), false);

        let result = processor.has_permission("chat");
        assert_eq!(result.verdict(), Tristate::Deny);
        assert_eq!(result.cause(), Some("default permission map"));
    }

    #[test]
    fn test_registry_default_resolved_against_elevation() {
        let defaults = Arc::new(DefaultPermissionMap::new());
        let regular = DefaultsProcessor::new(defaults.clone(), registry(), false);
        let elevated = DefaultsProcessor::new(defaults, registry(), true);

        assert_eq!(regular.has_permission("admin.kick").verdict(), Tristate::Deny);
        assert_eq!(elevated.has_permission("admin.kick").verdict(), Tristate::Allow);
        assert_eq!(
            elevated.has_permission("admin.kick").cause(),
            Some("permission map")
        );
    }

    #[test]
    fn test_unregistered_is_undefined() {
        let processor =
            DefaultsProcessor::new(Arc::new(DefaultPermissionMap::new()), registry(), true);
        assert_eq!(processor.has_permission("nope"), TristateResult::UNDEFINED);
    }

    #[test]
    fn test_default_map_is_split_by_elevation() {
        let defaults = DefaultPermissionMap::from_maps(
            [("Fly".to_string(), true)].into_iter().collect(),
            HashMap::new(),
        );
        assert_eq!(defaults.lookup("fly", true), Tristate::Allow);
        assert_eq!(defaults.lookup("fly", false), Tristate::Undefined);
    }

    #[test]
    fn test_register_keeps_first() {
        let registry = registry();
        assert!(!registry.register(RegisteredPermission {
            name: "CHAT".to_string(),
            default: PermissionDefault::False,
            description: None,
        }));
        assert_eq!(registry.get("chat").unwrap().default, PermissionDefault::True);
        assert_eq!(registry.len(), 2);
    }
}
