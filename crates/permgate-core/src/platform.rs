//! Wires every component together and reacts to host lifecycle signals.

use crate::config::PermGateConfig;
use crate::context::{ContextManager, ZoneCalculator};
use crate::delegate::{
    CheckMonitor, InjectMode, InjectionReport, MonitoringInjector, SessionDelegateFactory,
    TracingCheckMonitor,
};
use crate::host::{DataSource, Host, HostSubject, HostZones};
use crate::login::{
    AsyncPhaseChain, ConnectionEventSink, ConnectionSynchronizer, EnableGate, FinalizeEvent,
    NullEventSink, PhaseChain, PreAuthEvent, SyncDeps, SyncSettings,
};
use crate::messages::{DefaultLocale, Locale};
use crate::model::{InstanceId, SubjectId};
use crate::processor::{DefaultPermissionMap, PermissionRegistry};
use crate::resolver::Resolver;
use crate::service::PermissionService;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct PermGateBuilder {
    config: PermGateConfig,
    host: Arc<dyn Host>,
    data: Arc<dyn DataSource>,
    defaults: Arc<DefaultPermissionMap>,
    registry: Arc<PermissionRegistry>,
    events: Arc<dyn ConnectionEventSink>,
    monitor: Arc<dyn CheckMonitor>,
    locale: Option<Arc<dyn Locale>>,
}

impl PermGateBuilder {
    pub fn defaults(mut self, defaults: Arc<DefaultPermissionMap>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(mut self, registry: Arc<PermissionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn events(mut self, events: Arc<dyn ConnectionEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn CheckMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn locale(mut self, locale: Arc<dyn Locale>) -> Self {
        self.locale = Some(locale);
        self
    }

    pub fn build(self) -> PermGate {
        let config = self.config;
        let instance = InstanceId::new();

        let contexts = Arc::new(ContextManager::new(
            config.server.as_deref(),
            config.context_cache_ttl(),
        ));
        contexts.register_calculator(Arc::new(ZoneCalculator::new(
            &config.zone_rewrites,
            Arc::new(HostZones(self.host.clone())),
        )));

        let resolver = Arc::new(Resolver::with_capacity(
            self.defaults,
            self.registry,
            config.resolution_cache_capacity,
        ));
        let locale = self
            .locale
            .unwrap_or_else(|| Arc::new(DefaultLocale::new(config.message_overrides())));

        let sync = ConnectionSynchronizer::new(
            SyncDeps {
                host: self.host.clone(),
                data: self.data.clone(),
                resolver: resolver.clone(),
                contexts: contexts.clone(),
                delegates: SessionDelegateFactory::new(
                    instance,
                    self.data.clone(),
                    resolver.clone(),
                    contexts.clone(),
                ),
                gate: EnableGate::new(),
                locale,
                events: self.events,
            },
            SyncSettings::from_config(&config),
        );
        let monitoring = Arc::new(MonitoringInjector::new(
            instance,
            self.host.clone(),
            config.monitored_slots.clone(),
            self.monitor,
        ));
        let service = PermissionService::new(self.host.clone(), self.data.clone(), resolver.clone());

        PermGate {
            instance,
            config,
            host: self.host,
            contexts,
            resolver,
            sync,
            monitoring,
            service,
        }
    }
}

/// One running instance of the permission system inside a host.
pub struct PermGate {
    instance: InstanceId,
    config: PermGateConfig,
    host: Arc<dyn Host>,
    contexts: Arc<ContextManager>,
    resolver: Arc<Resolver>,
    sync: ConnectionSynchronizer,
    monitoring: Arc<MonitoringInjector>,
    service: PermissionService,
}

impl PermGate {
    pub fn builder(
        config: PermGateConfig,
        host: Arc<dyn Host>,
        data: Arc<dyn DataSource>,
    ) -> PermGateBuilder {
        PermGateBuilder {
            config,
            host,
            data,
            defaults: Arc::new(DefaultPermissionMap::new()),
            registry: Arc::new(PermissionRegistry::new()),
            events: Arc::new(NullEventSink),
            monitor: Arc::new(TracingCheckMonitor),
            locale: None,
        }
    }

    /// Called by the host on its main thread once the system is loaded.
    ///
    /// Subjects already online (hot reload) are loaded on the async pool and
    /// attached back on the main thread.
    pub fn enable(&self) -> InjectionReport {
        let report = self.monitoring.apply(InjectMode::Inject);

        // other extensions may replace host objects during their own startup
        let scheduler = self.host.scheduler();
        let monitoring = self.monitoring.clone();
        let host = self.host.clone();
        scheduler.run_async_delayed(
            Box::new(move || {
                host.scheduler().run_sync(Box::new(move || {
                    monitoring.apply(InjectMode::Inject);
                }));
            }),
            1,
        );

        let online = self.host.online_subjects();
        if !online.is_empty() {
            info!(count = online.len(), "attaching subjects that were already online");
        }
        for subject in online {
            let sync = self.sync.clone();
            let host = self.host.clone();
            scheduler.run_async(Box::new(move || {
                let id = subject.id();
                match sync.loader().load_blocking(id, &subject.name()) {
                    Ok(data) => host.scheduler().run_sync(Box::new(move || {
                        if let Err(e) = sync.attach_existing(&subject, &data) {
                            warn!(subject = %id, error = %e, "failed to attach online subject");
                        }
                    })),
                    Err(e) => warn!(subject = %id, error = %e, "failed to load online subject"),
                }
            }));
        }

        self.sync.gate().open();
        info!(instance = %self.instance, ?report, "permgate enabled");
        report
    }

    /// Called by the host on its main thread before unloading.
    pub fn disable(&self) -> usize {
        let detached = self.sync.detach_all();
        let report = self.monitoring.apply(InjectMode::Uninject);
        self.resolver.invalidate_all();
        info!(instance = %self.instance, detached, ?report, "permgate disabled");
        detached
    }

    /// Another extension finished enabling; it may have replaced actor
    /// delegates, so monitoring is re-applied on the main thread.
    pub fn on_extension_enabled(&self, extension: &str) {
        debug!(extension, "extension enabled, re-applying check monitoring");
        let monitoring = self.monitoring.clone();
        self.host.scheduler().run_sync(Box::new(move || {
            monitoring.apply(InjectMode::Inject);
        }));
    }

    /// The data source recalculated a subject's permission data.
    pub fn on_data_recalculated(&self, id: SubjectId) {
        self.resolver.invalidate(id);
        if !self.config.auto_elevate || self.host.is_stopping() {
            return;
        }
        let sync = self.sync.clone();
        let host = self.host.clone();
        self.host.scheduler().run_sync(Box::new(move || {
            if let Some(subject) = host.online_subject(id) {
                sync.refresh_elevated(subject.as_ref());
            }
        }));
    }

    /// A subject moved to another zone.
    pub fn on_zone_changed(&self, id: SubjectId) {
        self.contexts.invalidate(id);
    }

    pub fn on_disconnect(&self, subject: Arc<dyn HostSubject>) {
        self.sync.on_disconnect(subject);
    }

    pub fn register_stages(
        &self,
        pre_auth: &mut AsyncPhaseChain<PreAuthEvent>,
        finalize: &mut PhaseChain<FinalizeEvent>,
    ) {
        self.sync.register_stages(pre_auth, finalize);
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn config(&self) -> &PermGateConfig {
        &self.config
    }

    pub fn synchronizer(&self) -> &ConnectionSynchronizer {
        &self.sync
    }

    pub fn service(&self) -> &PermissionService {
        &self.service
    }

    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }
}
