use permgate_core::host::DataSource;
use permgate_core::{LoadError, PermissionNode, SubjectData, SubjectId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// Data source backed by maps, with load counting and failure injection.
#[derive(Default)]
pub struct InMemoryDataSource {
    stored: RwLock<HashMap<SubjectId, Vec<PermissionNode>>>,
    loaded: RwLock<HashMap<SubjectId, Arc<SubjectData>>>,
    failing: RwLock<HashSet<SubjectId>>,
    loads: RwLock<HashMap<SubjectId, usize>>,
    total_loads: AtomicUsize,
    load_delay: Duration,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `load` sleeps for `delay` first.
    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            load_delay: delay,
            ..Self::default()
        }
    }

    pub fn store(&self, id: SubjectId, nodes: Vec<PermissionNode>) {
        self.stored
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, nodes);
    }

    /// Replaces stored nodes and the loaded copy, if any. Returns whether the
    /// subject was loaded.
    pub fn recalculate(&self, id: SubjectId, nodes: Vec<PermissionNode>) -> bool {
        self.store(id, nodes.clone());
        let mut loaded = self.loaded.write().unwrap_or_else(|e| e.into_inner());
        match loaded.get_mut(&id) {
            Some(data) => {
                let mut next = (**data).clone();
                next.nodes = nodes;
                *data = Arc::new(next);
                true
            }
            None => false,
        }
    }

    pub fn set_failing(&self, id: SubjectId, failing: bool) {
        let mut set = self.failing.write().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    pub fn load_count(&self, id: SubjectId) -> usize {
        self.loads
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.total_loads.load(Ordering::SeqCst)
    }

    pub fn is_loaded(&self, id: SubjectId) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&id)
    }
}

impl DataSource for InMemoryDataSource {
    fn load(&self, id: SubjectId, name: &str) -> Result<Arc<SubjectData>, LoadError> {
        *self
            .loads
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_default() += 1;
        self.total_loads.fetch_add(1, Ordering::SeqCst);

        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
        {
            return Err(LoadError::Backend {
                id,
                detail: "storage backend unreachable".to_string(),
            });
        }

        let nodes = self
            .stored
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .unwrap_or_default();
        let data = Arc::new(SubjectData {
            id,
            name: name.to_string(),
            nodes,
        });
        self.loaded
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, data.clone());
        debug!(subject = %id, name, "loaded subject data");
        Ok(data)
    }

    fn get_if_loaded(&self, id: SubjectId) -> Option<Arc<SubjectData>> {
        self.loaded
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    fn unload(&self, id: SubjectId) {
        self.loaded
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_uses_stored_nodes_and_counts() {
        let source = InMemoryDataSource::new();
        let id = SubjectId::offline("alice");
        source.store(id, vec![PermissionNode::new("fly", true)]);

        let data = source.load(id, "alice").unwrap();
        assert_eq!(data.nodes.len(), 1);
        assert_eq!(source.load_count(id), 1);
        assert!(source.is_loaded(id));

        source.unload(id);
        assert!(source.get_if_loaded(id).is_none());
    }

    #[test]
    fn test_failing_subject() {
        let source = InMemoryDataSource::new();
        let id = SubjectId::offline("bob");
        source.set_failing(id, true);
        assert!(matches!(source.load(id, "bob"), Err(LoadError::Backend { .. })));
        assert!(!source.is_loaded(id));

        source.set_failing(id, false);
        assert!(source.load(id, "bob").is_ok());
        assert_eq!(source.load_count(id), 2);
    }

    #[test]
    fn test_recalculate_replaces_loaded_copy() {
        let source = InMemoryDataSource::new();
        let id = SubjectId::offline("carol");
        source.load(id, "carol").unwrap();
        assert!(source.recalculate(id, vec![PermissionNode::new("build", false)]));
        assert_eq!(source.get_if_loaded(id).unwrap().nodes[0].permission, "build");
    }
}
