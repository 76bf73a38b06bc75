use crate::host::{ConnectOutcome, ConnectRequest, SimHost};
use crate::source::InMemoryDataSource;
use permgate_core::delegate::InjectionReport;
use permgate_core::host::IdentityVerification;
use permgate_core::login::{ChannelEventSink, LoginProcessEvent};
use permgate_core::processor::{DefaultPermissionMap, PermissionRegistry};
use permgate_core::{PermGate, PermGateConfig, PermissionNode, SubjectId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub identity: IdentityVerification,
    pub zones: Vec<String>,
    pub load_delay: Duration,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            identity: IdentityVerification::Strict,
            zones: vec!["world".to_string()],
            load_delay: Duration::ZERO,
        }
    }
}

/// A host, a data source and one permission system instance wired together.
pub struct Simulation {
    host: Arc<SimHost>,
    data: Arc<InMemoryDataSource>,
    gate: Arc<PermGate>,
    events: ChannelEventSink,
}

impl Simulation {
    /// Builds and registers everything but does not enable. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: PermGateConfig,
        options: SimOptions,
        defaults: Arc<DefaultPermissionMap>,
        registry: Arc<PermissionRegistry>,
    ) -> Self {
        let host = SimHost::new(options.identity, options.zones);
        let data = Arc::new(InMemoryDataSource::with_load_delay(options.load_delay));
        let events = ChannelEventSink::new(256);
        let gate = Arc::new(
            PermGate::builder(config, host.clone(), data.clone())
                .defaults(defaults)
                .registry(registry)
                .events(Arc::new(events.clone()))
                .build(),
        );

        host.with_phases(|pre, fin| gate.register_stages(pre, fin));
        let weak = Arc::downgrade(&gate);
        host.on_disconnect(move |subject| {
            if let Some(gate) = weak.upgrade() {
                gate.on_disconnect(subject);
            }
        });

        Self {
            host,
            data,
            gate,
            events,
        }
    }

    /// `new`, then enable and settle.
    pub async fn start(
        config: PermGateConfig,
        options: SimOptions,
        defaults: Arc<DefaultPermissionMap>,
        registry: Arc<PermissionRegistry>,
    ) -> (Self, InjectionReport) {
        let sim = Self::new(config, options, defaults, registry);
        let report = sim.enable();
        sim.settle().await;
        (sim, report)
    }

    pub fn host(&self) -> &Arc<SimHost> {
        &self.host
    }

    pub fn data(&self) -> &Arc<InMemoryDataSource> {
        &self.data
    }

    pub fn gate(&self) -> &Arc<PermGate> {
        &self.gate
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoginProcessEvent> {
        self.events.subscribe()
    }

    pub fn enable(&self) -> InjectionReport {
        self.gate.enable()
    }

    pub fn disable(&self) -> usize {
        self.gate.disable()
    }

    pub async fn settle(&self) {
        self.host.sim_scheduler().settle().await;
    }

    /// Runs `ticks` host ticks, settling after each.
    pub async fn advance(&self, ticks: u64) {
        for _ in 0..ticks {
            self.host.sim_scheduler().tick();
            self.settle().await;
        }
    }

    pub async fn connect(&self, name: &str, zone: &str) -> ConnectOutcome {
        self.connect_with(ConnectRequest::new(name, zone)).await
    }

    pub async fn connect_with(&self, request: ConnectRequest) -> ConnectOutcome {
        let outcome = self.host.connect(request).await;
        self.settle().await;
        outcome
    }

    /// Fires disconnect; detach itself happens on a later tick.
    pub fn disconnect(&self, id: SubjectId) -> bool {
        self.host.disconnect(id)
    }

    pub fn change_zone(&self, id: SubjectId, zone: &str) -> bool {
        match self.host.subject(id) {
            Some(subject) => {
                subject.set_zone(zone);
                self.gate.on_zone_changed(id);
                true
            }
            None => false,
        }
    }

    pub async fn recalculate(&self, id: SubjectId, nodes: Vec<PermissionNode>) {
        self.data.recalculate(id, nodes);
        self.gate.on_data_recalculated(id);
        self.settle().await;
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.host.clear_listeners();
    }
}
