//! Boundary to the host runtime and the external data source.
//!
//! The host drives two pools: an unordered async pool and one serialized main
//! thread. Everything that mutates host-owned state (delegate slots, the
//! elevated flag) is dispatched through [`Scheduler::run_sync`].

use crate::delegate::DelegateSlot;
use crate::errors::LoadError;
use crate::model::{SubjectData, SubjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A unit of work handed to the host scheduler.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run on the async pool.
    fn run_async(&self, task: Task);
    /// Run on the main thread.
    fn run_sync(&self, task: Task);
    /// Run on the async pool after `ticks` host ticks.
    fn run_async_delayed(&self, task: Task, ticks: u64);
}

/// How strictly the host verifies identities at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityVerification {
    /// Online verification; data must have been loaded during pre-auth.
    #[default]
    Strict,
    /// Offline verification; finalize may fall back to a blocking load.
    Relaxed,
}

pub trait ZoneDirectory: Send + Sync {
    fn zones(&self) -> Vec<String>;
}

pub trait Host: Send + Sync {
    fn scheduler(&self) -> Arc<dyn Scheduler>;

    fn identity_verification(&self) -> IdentityVerification;

    fn online_subject(&self, id: SubjectId) -> Option<Arc<dyn HostSubject>>;

    fn online_subjects(&self) -> Vec<Arc<dyn HostSubject>>;

    /// A named non-subject actor slot (e.g. `internal/console`). `None` when
    /// this host version has no such slot.
    fn actor_slot(&self, name: &str) -> Option<Arc<dyn DelegateSlot>>;

    fn zones(&self) -> Vec<String>;

    fn is_stopping(&self) -> bool {
        false
    }
}

/// Adapts a [`Host`] to the zone directory the zone calculator consumes.
pub struct HostZones(pub Arc<dyn Host>);

impl ZoneDirectory for HostZones {
    fn zones(&self) -> Vec<String> {
        self.0.zones()
    }
}

/// A connected subject as the host exposes it.
pub trait HostSubject: Send + Sync {
    fn id(&self) -> SubjectId;
    fn name(&self) -> String;
    fn zone(&self) -> String;
    fn is_elevated(&self) -> bool;
    fn set_elevated(&self, value: bool);
    /// The slot holding this subject's check delegate.
    fn delegate_slot(&self) -> &dyn DelegateSlot;
}

/// Pluggable storage of permission assignments.
///
/// `load` may block on I/O and is only called from the async pool, except for
/// the relaxed-identity fallback at finalize.
pub trait DataSource: Send + Sync {
    fn load(&self, id: SubjectId, name: &str) -> Result<Arc<SubjectData>, LoadError>;
    fn get_if_loaded(&self, id: SubjectId) -> Option<Arc<SubjectData>>;
    fn unload(&self, id: SubjectId);
}
