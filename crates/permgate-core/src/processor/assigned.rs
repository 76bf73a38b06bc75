use super::PermissionProcessor;
use crate::context::ContextSet;
use crate::model::SubjectData;
use crate::tristate::{ResultFactory, TristateResult};
use std::collections::HashMap;

const ASSIGNED: ResultFactory = ResultFactory::new("assigned", "subject permission nodes");

/// The subject's own nodes, flattened for one context set.
#[derive(Debug)]
pub struct AssignedProcessor {
    map: HashMap<String, bool>,
}

impl AssignedProcessor {
    pub fn new(data: &SubjectData, contexts: &ContextSet) -> Self {
        Self {
            map: data.permission_map(contexts),
        }
    }
}

impl PermissionProcessor for AssignedProcessor {
    fn has_permission(&self, permission: &str) -> TristateResult {
        ASSIGNED.result(self.map.get(permission).copied().into())
    }
}
