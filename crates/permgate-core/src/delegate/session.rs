//! The per-subject delegate the host consults after attach.

use super::{unwrap_layers, CheckDelegate, Layer, LayerKind};
use crate::context::ContextManager;
use crate::errors::InjectionError;
use crate::host::{DataSource, HostSubject};
use crate::model::{InstanceId, SubjectId};
use crate::resolver::Resolver;
use crate::tristate::TristateResult;
use std::sync::{Arc, Weak};
use tracing::warn;

/// Answers checks through the resolution pipeline.
///
/// Holds the subject weakly; once the host drops it, or its data is unloaded,
/// every check degrades to an unresolved result instead of failing.
pub struct SessionDelegate {
    owner: InstanceId,
    subject_id: SubjectId,
    name: String,
    subject: Weak<dyn HostSubject>,
    original: Arc<dyn CheckDelegate>,
    data: Arc<dyn DataSource>,
    resolver: Arc<Resolver>,
    contexts: Arc<ContextManager>,
}

impl SessionDelegate {
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// The delegate that occupied the slot before attach.
    pub fn original(&self) -> &Arc<dyn CheckDelegate> {
        &self.original
    }
}

impl CheckDelegate for SessionDelegate {
    fn check(&self, permission: &str) -> TristateResult {
        let Some(subject) = self.subject.upgrade() else {
            warn!(subject = %self.subject_id, name = %self.name, permission, "check on a subject that is no longer online");
            return TristateResult::unresolved("subject session gone");
        };
        let Some(data) = self.data.get_if_loaded(self.subject_id) else {
            warn!(subject = %self.subject_id, name = %self.name, permission, "check on a subject without loaded data");
            return TristateResult::unresolved("subject data not loaded");
        };
        let contexts = self.contexts.contexts_for(subject.as_ref());
        self.resolver
            .resolve(&data, &contexts, subject.is_elevated(), permission)
    }

    fn layer(&self) -> Option<Layer<'_>> {
        Some(Layer {
            kind: LayerKind::Session,
            owner: self.owner,
            inner: &self.original,
        })
    }
}

/// Builds session delegates and swaps them in and out of subject slots.
#[derive(Clone)]
pub struct SessionDelegateFactory {
    owner: InstanceId,
    data: Arc<dyn DataSource>,
    resolver: Arc<Resolver>,
    contexts: Arc<ContextManager>,
}

impl SessionDelegateFactory {
    pub fn new(
        owner: InstanceId,
        data: Arc<dyn DataSource>,
        resolver: Arc<Resolver>,
        contexts: Arc<ContextManager>,
    ) -> Self {
        Self {
            owner,
            data,
            resolver,
            contexts,
        }
    }

    pub fn build(
        &self,
        subject: &Arc<dyn HostSubject>,
        original: Arc<dyn CheckDelegate>,
    ) -> SessionDelegate {
        SessionDelegate {
            owner: self.owner,
            subject_id: subject.id(),
            name: subject.name(),
            subject: Arc::downgrade(subject),
            original,
            data: self.data.clone(),
            resolver: self.resolver.clone(),
            contexts: self.contexts.clone(),
        }
    }

    /// Installs a fresh delegate. An already attached delegate is replaced,
    /// never stacked.
    pub fn attach(&self, subject: &Arc<dyn HostSubject>) -> Result<(), InjectionError> {
        let slot = subject.delegate_slot();
        let original = unwrap_layers(&slot.get()?);
        slot.set(Arc::new(self.build(subject, original)))
    }

    /// Restores the original delegate; `false` if nothing was attached.
    pub fn detach(subject: &dyn HostSubject) -> Result<bool, InjectionError> {
        let slot = subject.delegate_slot();
        let current = slot.get()?;
        if current.layer().is_none() {
            return Ok(false);
        }
        slot.set(unwrap_layers(&current))?;
        Ok(true)
    }

    pub fn is_attached(subject: &dyn HostSubject) -> bool {
        subject
            .delegate_slot()
            .get()
            .map(|d| d.layer().is_some_and(|l| l.kind == LayerKind::Session))
            .unwrap_or(false)
    }
}
