//! Query surface for other extensions and diagnostic tooling.

use crate::context::ContextSet;
use crate::host::{DataSource, Host};
use crate::model::SubjectId;
use crate::resolver::Resolver;
use crate::tristate::{Tristate, TristateResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct PermissionService {
    host: Arc<dyn Host>,
    data: Arc<dyn DataSource>,
    resolver: Arc<Resolver>,
}

impl PermissionService {
    pub fn new(host: Arc<dyn Host>, data: Arc<dyn DataSource>, resolver: Arc<Resolver>) -> Self {
        Self {
            host,
            data,
            resolver,
        }
    }

    /// Resolves `permission` for a loaded subject in the given contexts.
    ///
    /// The elevated flag is taken from the online subject; offline subjects
    /// are treated as not elevated. Unloaded subjects yield an unresolved
    /// result.
    pub fn check(&self, id: SubjectId, permission: &str, contexts: &ContextSet) -> TristateResult {
        let Some(data) = self.data.get_if_loaded(id) else {
            return TristateResult::unresolved("subject data not loaded");
        };
        let elevated = self
            .host
            .online_subject(id)
            .map(|s| s.is_elevated())
            .unwrap_or(false);
        self.resolver.resolve(&data, contexts, elevated, permission)
    }

    pub fn has_permission(&self, id: SubjectId, permission: &str, contexts: &ContextSet) -> Tristate {
        self.check(id, permission, contexts).verdict()
    }
}
