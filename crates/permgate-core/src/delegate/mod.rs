//! Check delegates and the slots that hold them.
//!
//! Every wrapper this system installs implements [`CheckDelegate::layer`],
//! which hands back its immediate inner delegate. Unwrapping therefore never
//! guesses: it follows `layer()` until a delegate without one is reached,
//! which is the host's original.

mod monitor;
mod session;

pub use monitor::{
    CheckMonitor, InjectMode, InjectionReport, MonitoredDelegate, MonitoringInjector,
    TracingCheckMonitor,
};
pub use session::{SessionDelegate, SessionDelegateFactory};

use crate::errors::InjectionError;
use crate::model::InstanceId;
use crate::tristate::TristateResult;
use std::sync::{Arc, RwLock};

/// The host-facing check interface.
pub trait CheckDelegate: Send + Sync {
    fn check(&self, permission: &str) -> TristateResult;

    fn has_permission(&self, permission: &str) -> bool {
        self.check(permission).verdict().as_bool()
    }

    fn is_permission_set(&self, permission: &str) -> bool {
        self.check(permission).verdict().is_defined()
    }

    /// `Some` for wrappers installed by this system.
    fn layer(&self) -> Option<Layer<'_>> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Monitoring,
    Session,
}

pub struct Layer<'a> {
    pub kind: LayerKind,
    pub owner: InstanceId,
    pub inner: &'a Arc<dyn CheckDelegate>,
}

/// Walks every layer down to the delegate the host originally installed.
pub fn unwrap_layers(delegate: &Arc<dyn CheckDelegate>) -> Arc<dyn CheckDelegate> {
    let mut current = delegate.clone();
    loop {
        let next = match current.layer() {
            Some(layer) => layer.inner.clone(),
            None => return current,
        };
        current = next;
    }
}

/// Number of layers above the original.
pub fn layer_depth(delegate: &Arc<dyn CheckDelegate>) -> usize {
    let mut depth = 0;
    let mut current = delegate.clone();
    loop {
        let next = match current.layer() {
            Some(layer) => layer.inner.clone(),
            None => return depth,
        };
        depth += 1;
        current = next;
    }
}

/// A host-owned, settable slot holding a check delegate.
///
/// Mutation must happen on the host main thread.
pub trait DelegateSlot: Send + Sync {
    fn name(&self) -> &str;
    fn get(&self) -> Result<Arc<dyn CheckDelegate>, InjectionError>;
    fn set(&self, delegate: Arc<dyn CheckDelegate>) -> Result<(), InjectionError>;
}

/// `RwLock`-backed slot for host implementations.
pub struct SharedSlot {
    name: String,
    current: RwLock<Arc<dyn CheckDelegate>>,
}

impl SharedSlot {
    pub fn new(name: impl Into<String>, initial: Arc<dyn CheckDelegate>) -> Self {
        Self {
            name: name.into(),
            current: RwLock::new(initial),
        }
    }
}

impl DelegateSlot for SharedSlot {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self) -> Result<Arc<dyn CheckDelegate>, InjectionError> {
        self.current
            .read()
            .map(|d| d.clone())
            .map_err(|_| InjectionError::Poisoned(self.name.clone()))
    }

    fn set(&self, delegate: Arc<dyn CheckDelegate>) -> Result<(), InjectionError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| InjectionError::Poisoned(self.name.clone()))?;
        *guard = delegate;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::tristate::Tristate;

    /// Stand-in for a host's native delegate.
    pub struct Native(pub Tristate);

    impl CheckDelegate for Native {
        fn check(&self, _permission: &str) -> TristateResult {
            crate::tristate::ResultFactory::new("native", "host").result(self.0)
        }
    }

    pub fn native(verdict: Tristate) -> Arc<dyn CheckDelegate> {
        Arc::new(Native(verdict))
    }
}
