//! Builds and caches processor chains.
//!
//! A chain is fixed for one (subject, context set, elevated) triple, so it is
//! cached under that key. Data recalculation or detach invalidates every
//! entry of the subject.

use crate::context::ContextSet;
use crate::model::{SubjectData, SubjectId};
use crate::processor::{
    AssignedProcessor, DefaultPermissionMap, DefaultsProcessor, PermissionCalculator,
    PermissionRegistry,
};
use crate::tristate::TristateResult;
use moka::sync::Cache;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CalculatorKey {
    pub subject: SubjectId,
    pub contexts: ContextSet,
    pub elevated: bool,
}

/// Per-subject calculator cache. The resolver only queries and invalidates it.
pub trait ResolutionCache: Send + Sync {
    fn get_or_build(
        &self,
        key: CalculatorKey,
        build: &dyn Fn() -> Arc<PermissionCalculator>,
    ) -> Arc<PermissionCalculator>;

    fn invalidate_subject(&self, id: SubjectId);

    fn invalidate_all(&self);
}

pub struct MokaResolutionCache {
    cache: Cache<CalculatorKey, Arc<PermissionCalculator>>,
}

impl MokaResolutionCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .support_invalidation_closures()
                .build(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}

impl ResolutionCache for MokaResolutionCache {
    fn get_or_build(
        &self,
        key: CalculatorKey,
        build: &dyn Fn() -> Arc<PermissionCalculator>,
    ) -> Arc<PermissionCalculator> {
        self.cache.get_with(key, build)
    }

    fn invalidate_subject(&self, id: SubjectId) {
        if let Err(e) = self.cache.invalidate_entries_if(move |k, _| k.subject == id) {
            warn!(subject = %id, error = %e, "failed to register cache invalidation, dropping all entries");
            self.cache.invalidate_all();
        }
    }

    fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Assembles the processor chain: the subject's own nodes, then the host
/// default-permission map, then registry defaults.
pub struct Resolver {
    defaults: Arc<DefaultPermissionMap>,
    registry: Arc<PermissionRegistry>,
    cache: Arc<dyn ResolutionCache>,
}

impl Resolver {
    pub fn new(
        defaults: Arc<DefaultPermissionMap>,
        registry: Arc<PermissionRegistry>,
        cache: Arc<dyn ResolutionCache>,
    ) -> Self {
        Self {
            defaults,
            registry,
            cache,
        }
    }

    pub fn with_capacity(
        defaults: Arc<DefaultPermissionMap>,
        registry: Arc<PermissionRegistry>,
        capacity: u64,
    ) -> Self {
        Self::new(
            defaults,
            registry,
            Arc::new(MokaResolutionCache::new(capacity)),
        )
    }

    pub fn defaults(&self) -> &Arc<DefaultPermissionMap> {
        &self.defaults
    }

    pub fn registry(&self) -> &Arc<PermissionRegistry> {
        &self.registry
    }

    pub fn calculator(
        &self,
        data: &SubjectData,
        contexts: &ContextSet,
        elevated: bool,
    ) -> Arc<PermissionCalculator> {
        let key = CalculatorKey {
            subject: data.id,
            contexts: contexts.clone(),
            elevated,
        };
        self.cache.get_or_build(key, &|| {
            Arc::new(PermissionCalculator::new(vec![
                Box::new(AssignedProcessor::new(data, contexts)),
                Box::new(DefaultsProcessor::new(
                    self.defaults.clone(),
                    self.registry.clone(),
                    elevated,
                )),
            ]))
        })
    }

    pub fn resolve(
        &self,
        data: &SubjectData,
        contexts: &ContextSet,
        elevated: bool,
        permission: &str,
    ) -> TristateResult {
        self.calculator(data, contexts, elevated).check(permission)
    }

    pub fn invalidate(&self, id: SubjectId) {
        self.cache.invalidate_subject(id);
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
