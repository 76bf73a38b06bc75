//! Observable wrappers around host actor delegates.

use super::{unwrap_layers, CheckDelegate, DelegateSlot, Layer, LayerKind};
use crate::errors::InjectionError;
use crate::host::Host;
use crate::model::InstanceId;
use crate::tristate::TristateResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Receives every check passing through a monitored delegate.
pub trait CheckMonitor: Send + Sync {
    fn on_check(&self, origin: &str, permission: &str, result: &TristateResult);
}

/// Logs checks at `trace` under the `permgate::verbose` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCheckMonitor;

impl CheckMonitor for TracingCheckMonitor {
    fn on_check(&self, origin: &str, permission: &str, result: &TristateResult) {
        trace!(
            target: "permgate::verbose",
            origin,
            permission,
            result = %result.describe(),
            "permission check"
        );
    }
}

pub struct MonitoredDelegate {
    owner: InstanceId,
    origin: String,
    inner: Arc<dyn CheckDelegate>,
    monitor: Arc<dyn CheckMonitor>,
}

impl MonitoredDelegate {
    pub fn new(
        owner: InstanceId,
        origin: impl Into<String>,
        inner: Arc<dyn CheckDelegate>,
        monitor: Arc<dyn CheckMonitor>,
    ) -> Self {
        Self {
            owner,
            origin: origin.into(),
            inner,
            monitor,
        }
    }
}

impl CheckDelegate for MonitoredDelegate {
    fn check(&self, permission: &str) -> TristateResult {
        let result = self.inner.check(permission);
        self.monitor.on_check(&self.origin, permission, &result);
        result
    }

    fn layer(&self) -> Option<Layer<'_>> {
        Some(Layer {
            kind: LayerKind::Monitoring,
            owner: self.owner,
            inner: &self.inner,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectMode {
    Inject,
    Uninject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InjectionReport {
    pub injected: Vec<String>,
    pub unchanged: Vec<String>,
    pub restored: Vec<String>,
    pub unavailable: Vec<String>,
}

enum SlotOutcome {
    Injected,
    Unchanged,
    Restored,
}

/// Wraps or unwraps the configured actor slots.
///
/// Runs on the host main thread. A slot that cannot be reached only disables
/// monitoring for that slot.
pub struct MonitoringInjector {
    owner: InstanceId,
    host: Arc<dyn Host>,
    slots: Vec<String>,
    monitor: Arc<dyn CheckMonitor>,
}

impl MonitoringInjector {
    pub fn new(
        owner: InstanceId,
        host: Arc<dyn Host>,
        slots: Vec<String>,
        monitor: Arc<dyn CheckMonitor>,
    ) -> Self {
        Self {
            owner,
            host,
            slots,
            monitor,
        }
    }

    pub fn apply(&self, mode: InjectMode) -> InjectionReport {
        let mut report = InjectionReport::default();
        for name in &self.slots {
            let outcome = self
                .host
                .actor_slot(name)
                .ok_or_else(|| InjectionError::SlotMissing(name.clone()))
                .and_then(|slot| match mode {
                    InjectMode::Inject => self.inject(slot.as_ref()),
                    InjectMode::Uninject => Self::uninject(slot.as_ref()),
                });
            match outcome {
                Ok(SlotOutcome::Injected) => report.injected.push(name.clone()),
                Ok(SlotOutcome::Unchanged) => report.unchanged.push(name.clone()),
                Ok(SlotOutcome::Restored) => report.restored.push(name.clone()),
                Err(e) => {
                    warn!(slot = %name, error = %e, "check monitoring unavailable for slot");
                    report.unavailable.push(name.clone());
                }
            }
        }
        debug!(?mode, ?report, "monitoring injection applied");
        report
    }

    fn inject(&self, slot: &dyn DelegateSlot) -> Result<SlotOutcome, InjectionError> {
        let current = slot.get()?;
        let ours = current
            .layer()
            .is_some_and(|l| l.kind == LayerKind::Monitoring && l.owner == self.owner);
        if ours {
            return Ok(SlotOutcome::Unchanged);
        }
        let original = unwrap_layers(&current);
        slot.set(Arc::new(MonitoredDelegate::new(
            self.owner,
            slot.name(),
            original,
            self.monitor.clone(),
        )))?;
        Ok(SlotOutcome::Injected)
    }

    fn uninject(slot: &dyn DelegateSlot) -> Result<SlotOutcome, InjectionError> {
        let current = slot.get()?;
        if current.layer().is_none() {
            return Ok(SlotOutcome::Unchanged);
        }
        slot.set(unwrap_layers(&current))?;
        Ok(SlotOutcome::Restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::testing::native;
    use crate::delegate::{layer_depth, SharedSlot};
    use crate::host::{HostSubject, IdentityVerification, Scheduler, Task};
    use crate::model::SubjectId;
    use crate::tristate::Tristate;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct Inline;

    impl Scheduler for Inline {
        fn run_async(&self, task: Task) {
            task()
        }
        fn run_sync(&self, task: Task) {
            task()
        }
        fn run_async_delayed(&self, task: Task, _ticks: u64) {
            task()
        }
    }

    struct SlotHost {
        slots: HashMap<String, Arc<SharedSlot>>,
    }

    impl Host for SlotHost {
        fn scheduler(&self) -> Arc<dyn Scheduler> {
            Arc::new(Inline)
        }
        fn identity_verification(&self) -> IdentityVerification {
            IdentityVerification::Strict
        }
        fn online_subject(&self, _id: SubjectId) -> Option<Arc<dyn HostSubject>> {
            None
        }
        fn online_subjects(&self) -> Vec<Arc<dyn HostSubject>> {
            Vec::new()
        }
        fn actor_slot(&self, name: &str) -> Option<Arc<dyn DelegateSlot>> {
            self.slots
                .get(name)
                .map(|s| s.clone() as Arc<dyn DelegateSlot>)
        }
        fn zones(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl CheckMonitor for Recording {
        fn on_check(&self, origin: &str, permission: &str, result: &TristateResult) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{origin} {permission} {}", result.verdict()));
        }
    }

    fn setup() -> (Arc<SharedSlot>, Arc<dyn CheckDelegate>, Arc<dyn Host>) {
        let original = native(Tristate::Allow);
        let slot = Arc::new(SharedSlot::new("internal/console", original.clone()));
        let host: Arc<dyn Host> = Arc::new(SlotHost {
            slots: [("internal/console".to_string(), slot.clone())]
                .into_iter()
                .collect(),
        });
        (slot, original, host)
    }

    fn injector(owner: InstanceId, host: &Arc<dyn Host>, slots: &[&str]) -> MonitoringInjector {
        MonitoringInjector::new(
            owner,
            host.clone(),
            slots.iter().map(|s| s.to_string()).collect(),
            Arc::new(TracingCheckMonitor),
        )
    }

    #[test]
    fn test_inject_is_idempotent() {
        let (slot, _, host) = setup();
        let injector = injector(InstanceId::new(), &host, &["internal/console"]);

        let first = injector.apply(InjectMode::Inject);
        assert_eq!(first.injected, ["internal/console"]);
        let second = injector.apply(InjectMode::Inject);
        assert_eq!(second.unchanged, ["internal/console"]);
        assert_eq!(layer_depth(&slot.get().unwrap()), 1);
    }

    #[test]
    fn test_uninject_restores_original_after_many_injects() {
        let (slot, original, host) = setup();
        let injector = injector(InstanceId::new(), &host, &["internal/console"]);
        for _ in 0..4 {
            injector.apply(InjectMode::Inject);
        }
        let report = injector.apply(InjectMode::Uninject);
        assert_eq!(report.restored, ["internal/console"]);
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &original));

        let again = injector.apply(InjectMode::Uninject);
        assert_eq!(again.unchanged, ["internal/console"]);
    }

    #[test]
    fn test_previous_instance_wrapper_is_replaced_not_stacked() {
        let (slot, original, host) = setup();
        injector(InstanceId::new(), &host, &["internal/console"]).apply(InjectMode::Inject);

        let reloaded = injector(InstanceId::new(), &host, &["internal/console"]);
        let report = reloaded.apply(InjectMode::Inject);
        assert_eq!(report.injected, ["internal/console"]);

        let current = slot.get().unwrap();
        assert_eq!(layer_depth(&current), 1);
        assert!(Arc::ptr_eq(&unwrap_layers(&current), &original));
    }

    #[test]
    fn test_missing_slot_is_reported_not_fatal() {
        let (_, _, host) = setup();
        let report = injector(InstanceId::new(), &host, &["internal/console", "internal/rcon"])
            .apply(InjectMode::Inject);
        assert_eq!(report.injected, ["internal/console"]);
        assert_eq!(report.unavailable, ["internal/rcon"]);
    }

    #[test]
    fn test_monitor_sees_checks() {
        let (slot, _, host) = setup();
        let recording = Arc::new(Recording::default());
        MonitoringInjector::new(
            InstanceId::new(),
            host,
            vec!["internal/console".to_string()],
            recording.clone(),
        )
        .apply(InjectMode::Inject);

        assert!(slot.get().unwrap().has_permission("server.stop"));
        assert_eq!(
            recording.0.lock().unwrap().as_slice(),
            ["internal/console server.stop allow"]
        );
    }
}
