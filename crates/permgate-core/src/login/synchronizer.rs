//! Coordinates the host's connection phases with data loading and delegate
//! attachment.
//!
//! Attempts are tracked by [`AttemptToken`] until attach; only then does an
//! attempt become the live session of its subject id. A deferred detach that
//! no longer matches the live token is dropped without touching the slot.

use super::chain::{AsyncPhaseChain, AsyncPhaseStage, PhaseChain, PhaseStage, Priority};
use super::decision::DenyOnly;
use super::events::{ConnectionEventSink, LoginProcessEvent};
use super::gate::EnableGate;
use super::loader::SubjectLoader;
use super::state::{AttachState, ConnectionState};
use crate::config::PermGateConfig;
use crate::context::ContextManager;
use crate::delegate::SessionDelegateFactory;
use crate::errors::ConnectionError;
use crate::host::{DataSource, Host, HostSubject, IdentityVerification};
use crate::messages::{Locale, MessageKey};
use crate::model::{AttemptToken, SubjectData, SubjectId};
use crate::resolver::Resolver;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Node consulted by the auto-elevate policy.
pub const AUTO_ELEVATE_PERMISSION: &str = "permgate.autoelevate";

macro_rules! login_log {
    ($settings:expr, $($arg:tt)+) => {
        if $settings.debug_logins {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

pub struct PreAuthEvent {
    pub attempt: AttemptToken,
    pub subject_id: SubjectId,
    pub name: String,
}

pub struct FinalizeEvent {
    pub attempt: AttemptToken,
    pub subject: Arc<dyn HostSubject>,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    pub enable_timeout: Duration,
    pub detach_delay_ticks: u64,
    pub auto_elevate: bool,
    pub debug_logins: bool,
}

impl SyncSettings {
    pub fn from_config(config: &PermGateConfig) -> Self {
        Self {
            enable_timeout: config.enable_timeout(),
            detach_delay_ticks: config.detach_delay_ticks.max(1),
            auto_elevate: config.auto_elevate,
            debug_logins: config.debug_logins,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&PermGateConfig::default())
    }
}

/// Collaborators the synchronizer drives.
pub struct SyncDeps {
    pub host: Arc<dyn Host>,
    pub data: Arc<dyn DataSource>,
    pub resolver: Arc<Resolver>,
    pub contexts: Arc<ContextManager>,
    pub delegates: SessionDelegateFactory,
    pub gate: EnableGate,
    pub locale: Arc<dyn Locale>,
    pub events: Arc<dyn ConnectionEventSink>,
}

struct AttemptRecord {
    subject_id: SubjectId,
    state: ConnectionState,
    attach: AttachState,
    denied_here: bool,
}

impl AttemptRecord {
    fn new(subject_id: SubjectId, state: ConnectionState) -> Self {
        Self {
            subject_id,
            state,
            attach: AttachState::Unattached,
            denied_here: false,
        }
    }
}

#[derive(Default)]
struct Tracker {
    attempts: HashMap<AttemptToken, AttemptRecord>,
    live: HashMap<SubjectId, AttemptToken>,
    seen: HashSet<SubjectId>,
}

impl Tracker {
    /// Drops attempts of `id` that ended or never reached finalize.
    fn forget_finished(&mut self, id: SubjectId) {
        self.attempts.retain(|_, r| {
            !(r.subject_id == id
                && matches!(
                    r.state,
                    ConnectionState::Aborted | ConnectionState::PreAuthDone | ConnectionState::Closed
                ))
        });
    }

    /// An attempt of `id` is between pre-auth and attach.
    fn has_pending_attempt(&self, id: SubjectId) -> bool {
        self.attempts.values().any(|r| {
            r.subject_id == id
                && matches!(
                    r.state,
                    ConnectionState::PreAuthPending
                        | ConnectionState::PreAuthDone
                        | ConnectionState::FinalizePending
                )
        })
    }
}

struct SyncInner {
    deps: SyncDeps,
    loader: SubjectLoader,
    settings: SyncSettings,
    tracker: Mutex<Tracker>,
}

#[derive(Clone)]
pub struct ConnectionSynchronizer {
    inner: Arc<SyncInner>,
}

impl ConnectionSynchronizer {
    pub fn new(deps: SyncDeps, settings: SyncSettings) -> Self {
        let loader = SubjectLoader::new(deps.data.clone());
        Self {
            inner: Arc::new(SyncInner {
                deps,
                loader,
                settings,
                tracker: Mutex::new(Tracker::default()),
            }),
        }
    }

    pub fn gate(&self) -> &EnableGate {
        &self.inner.deps.gate
    }

    pub fn loader(&self) -> &SubjectLoader {
        &self.inner.loader
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    fn with_tracker<R>(&self, f: impl FnOnce(&mut Tracker) -> R) -> R {
        let mut tracker = self.inner.tracker.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tracker)
    }

    fn transition(&self, token: AttemptToken, next: ConnectionState) -> Result<(), ConnectionError> {
        self.with_tracker(|t| -> Result<(), ConnectionError> {
            let record = t
                .attempts
                .get_mut(&token)
                .ok_or(ConnectionError::UnknownAttempt(token))?;
            record.state.advance(next)?;
            Ok(())
        })
    }

    fn mark_denied(&self, token: AttemptToken) {
        self.with_tracker(|t| {
            if let Some(record) = t.attempts.get_mut(&token) {
                record.denied_here = true;
            }
        });
    }

    fn emit(&self, id: SubjectId, name: &str, data: Option<Arc<SubjectData>>, first_seen: bool) {
        self.inner.deps.events.emit(LoginProcessEvent {
            subject: id,
            name: name.to_string(),
            data,
            first_seen,
            at: chrono::Utc::now(),
        });
    }

    // ========================================================================
    // Pre-auth (async pool)
    // ========================================================================

    pub async fn pre_auth(
        &self,
        event: &PreAuthEvent,
        decision: &mut DenyOnly<'_>,
    ) -> Result<(), ConnectionError> {
        let settings = &self.inner.settings;
        let (token, id, name) = (event.attempt, event.subject_id, event.name.as_str());
        login_log!(settings, attempt = %token, subject = %id, name, "processing pre-auth");

        if let Err(e) = self.inner.deps.gate.wait(settings.enable_timeout).await {
            warn!(attempt = %token, subject = %id, error = %e, "enable not complete, continuing pre-auth");
        }

        self.with_tracker(|t| {
            t.forget_finished(id);
            if let Some(live) = t.live.get(&id) {
                warn!(attempt = %token, live = %live, subject = %id, "pre-auth for a subject with a live session, tracking it separately");
            }
            t.attempts
                .insert(token, AttemptRecord::new(id, ConnectionState::PreAuthPending));
        });

        if decision.is_denied() {
            login_log!(settings, attempt = %token, subject = %id, name, "connection already denied, skipping data load");
            // no data is loaded, so a later re-allow must not let it through
            self.mark_denied(token);
            self.transition(token, ConnectionState::Aborted)?;
            return Err(ConnectionError::UpstreamDenied);
        }

        let first_seen = self.with_tracker(|t| !t.seen.contains(&id));
        match self.inner.loader.load(id, name).await {
            Ok(data) => {
                self.with_tracker(|t| t.seen.insert(id));
                self.transition(token, ConnectionState::PreAuthDone)?;
                login_log!(settings, attempt = %token, subject = %id, name, first_seen, "pre-auth data loaded");
                self.emit(id, name, Some(data), first_seen);
                Ok(())
            }
            Err(e) => {
                error!(attempt = %token, subject = %id, name, error = %e, "failed to load permission data during pre-auth");
                decision.deny(self.inner.deps.locale.render(MessageKey::LoadingDatabaseError));
                self.mark_denied(token);
                let live = self.with_tracker(|t| t.live.contains_key(&id));
                if !live {
                    self.inner.deps.data.unload(id);
                }
                self.transition(token, ConnectionState::Aborted)?;
                self.emit(id, name, None, first_seen);
                Err(e.into())
            }
        }
    }

    /// Runs after every other pre-auth stage.
    pub fn pre_auth_monitor(
        &self,
        event: &PreAuthEvent,
        decision: &mut DenyOnly<'_>,
    ) -> Result<(), ConnectionError> {
        self.guard_reallow(event.attempt, event.subject_id, decision)
    }

    fn guard_reallow(
        &self,
        token: AttemptToken,
        id: SubjectId,
        decision: &mut DenyOnly<'_>,
    ) -> Result<(), ConnectionError> {
        let denied_here = self.with_tracker(|t| t.attempts.get(&token).is_some_and(|r| r.denied_here));
        if denied_here && decision.is_allowed() {
            error!(
                attempt = %token,
                subject = %id,
                "connection was denied for missing permission data but re-allowed by another listener, denying again"
            );
            decision.deny(self.inner.deps.locale.render(MessageKey::ReallowedAfterDeny));
            return Err(ConnectionError::ReallowedAfterDeny(id));
        }
        Ok(())
    }

    // ========================================================================
    // Finalize (main thread)
    // ========================================================================

    pub fn finalize(
        &self,
        event: &FinalizeEvent,
        decision: &mut DenyOnly<'_>,
    ) -> Result<(), ConnectionError> {
        let settings = &self.inner.settings;
        let subject = &event.subject;
        let (token, id, name) = (event.attempt, subject.id(), subject.name());
        login_log!(settings, attempt = %token, subject = %id, name = %name, "processing finalize");

        // an attempt whose pre-auth ran before enable is treated as loaded
        let entered = self.with_tracker(|t| {
            t.attempts
                .entry(token)
                .or_insert_with(|| AttemptRecord::new(id, ConnectionState::PreAuthDone))
                .state
                .advance(ConnectionState::FinalizePending)
        });
        if let Err(e) = entered {
            error!(attempt = %token, subject = %id, error = %e, "finalize for an attempt that did not complete pre-auth");
            decision.deny(self.inner.deps.locale.render(MessageKey::LoadingStateError));
            self.mark_denied(token);
            return Err(e.into());
        }

        let data = match self.inner.deps.data.get_if_loaded(id) {
            Some(data) => data,
            None => match self.inner.deps.host.identity_verification() {
                IdentityVerification::Strict => {
                    let seen_before = self.with_tracker(|t| t.seen.contains(&id));
                    if seen_before {
                        error!(attempt = %token, subject = %id, name = %name, "permission data of a subject seen earlier this run is missing at finalize");
                    } else {
                        error!(attempt = %token, subject = %id, name = %name, "permission data was never pre-loaded for this subject");
                    }
                    return Err(self.abort_finalize(
                        token,
                        decision,
                        MessageKey::LoadingStateError,
                        ConnectionError::MissingDataAtFinalize { id, seen_before },
                    ));
                }
                IdentityVerification::Relaxed => {
                    warn!(attempt = %token, subject = %id, name = %name, "no pre-loaded data at finalize, loading on the main thread");
                    match self.inner.loader.load_blocking(id, &name) {
                        Ok(data) => {
                            self.with_tracker(|t| t.seen.insert(id));
                            data
                        }
                        Err(e) => {
                            error!(attempt = %token, subject = %id, error = %e, "fallback load at finalize failed");
                            return Err(self.abort_finalize(
                                token,
                                decision,
                                MessageKey::LoadingDatabaseError,
                                e.into(),
                            ));
                        }
                    }
                }
            },
        };

        if let Err(e) = self.inner.deps.delegates.attach(subject) {
            error!(attempt = %token, subject = %id, error = %e, "failed to attach session delegate");
            return Err(self.abort_finalize(
                token,
                decision,
                MessageKey::LoadingSetupError,
                e.into(),
            ));
        }

        let previous = self.with_tracker(|t| -> Result<Option<AttemptToken>, ConnectionError> {
            let record = t
                .attempts
                .get_mut(&token)
                .ok_or(ConnectionError::UnknownAttempt(token))?;
            record.state.advance(ConnectionState::Attached)?;
            record.attach = AttachState::Attached;
            Ok(t.live.insert(id, token))
        })?;
        if let Some(previous) = previous.filter(|p| *p != token) {
            warn!(attempt = %token, previous = %previous, subject = %id, "attach replaced the live session of an earlier attempt");
        }

        if settings.auto_elevate {
            self.apply_elevation(subject.as_ref(), &data);
        }
        login_log!(settings, attempt = %token, subject = %id, name = %name, "session delegate attached");
        Ok(())
    }

    fn abort_finalize(
        &self,
        token: AttemptToken,
        decision: &mut DenyOnly<'_>,
        key: MessageKey,
        err: ConnectionError,
    ) -> ConnectionError {
        decision.deny(self.inner.deps.locale.render(key));
        self.with_tracker(|t| {
            if let Some(record) = t.attempts.get_mut(&token) {
                record.denied_here = true;
                if let Err(e) = record.state.advance(ConnectionState::Aborted) {
                    debug!(attempt = %token, error = %e, "attempt already left the pre-attach states");
                }
            }
        });
        err
    }

    /// Runs after every other finalize stage. A connection denied after
    /// attach is cleaned up through the regular deferred detach.
    pub fn finalize_monitor(
        &self,
        event: &FinalizeEvent,
        decision: &mut DenyOnly<'_>,
    ) -> Result<(), ConnectionError> {
        let token = event.attempt;
        self.guard_reallow(token, event.subject.id(), decision)?;

        let attached = self.with_tracker(|t| {
            t.attempts
                .get(&token)
                .is_some_and(|r| r.state == ConnectionState::Attached)
        });
        if attached && decision.is_denied() {
            info!(attempt = %token, subject = %event.subject.id(), "connection denied after attach, scheduling detach");
            self.schedule_detach(event.subject.clone(), token);
        }
        Ok(())
    }

    // ========================================================================
    // Detach
    // ========================================================================

    pub fn on_disconnect(&self, subject: Arc<dyn HostSubject>) {
        let id = subject.id();
        let token = self.with_tracker(|t| {
            t.forget_finished(id);
            t.live.get(&id).copied()
        });
        match token {
            Some(token) => self.schedule_detach(subject, token),
            None => debug!(subject = %id, "disconnect without a live session"),
        }
    }

    fn schedule_detach(&self, subject: Arc<dyn HostSubject>, token: AttemptToken) {
        if let Err(e) = self.transition(token, ConnectionState::DetachPending) {
            debug!(attempt = %token, error = %e, "detach not scheduled");
            return;
        }
        let this = self.clone();
        self.inner.deps.host.scheduler().run_async_delayed(
            Box::new(move || {
                let scheduler = this.inner.deps.host.scheduler();
                scheduler.run_sync(Box::new(move || this.complete_detach(subject.as_ref(), token)));
            }),
            self.inner.settings.detach_delay_ticks,
        );
    }

    /// Main thread only.
    fn complete_detach(&self, subject: &dyn HostSubject, token: AttemptToken) {
        let id = subject.id();
        // a closed record stays until the next attempt of the same subject
        let current = self.with_tracker(|t| {
            let current = t.live.get(&id) == Some(&token);
            if !current {
                t.attempts.remove(&token);
                return false;
            }
            t.live.remove(&id);
            if let Some(record) = t.attempts.get_mut(&token) {
                if let Err(e) = record.state.advance(ConnectionState::Closed) {
                    debug!(attempt = %token, error = %e, "closing attempt out of order");
                }
                record.attach = AttachState::Detached;
            }
            true
        });
        if !current {
            debug!(attempt = %token, subject = %id, "detach of a superseded attempt skipped");
            return;
        }
        self.release(subject);
        login_log!(self.inner.settings, attempt = %token, subject = %id, "session detached");
    }

    fn release(&self, subject: &dyn HostSubject) {
        let id = subject.id();
        match SessionDelegateFactory::detach(subject) {
            Ok(true) => {}
            Ok(false) => debug!(subject = %id, "no session delegate to detach"),
            Err(e) => warn!(subject = %id, error = %e, "failed to detach session delegate"),
        }
        if self.inner.settings.auto_elevate {
            subject.set_elevated(false);
        }
        self.inner.deps.contexts.on_subject_quit(id);
        self.inner.deps.resolver.invalidate(id);
        if self.reconnecting(id) {
            return;
        }
        let this = self.clone();
        self.inner.deps.host.scheduler().run_async(Box::new(move || {
            if !this.reconnecting(id) {
                this.inner.deps.data.unload(id);
            }
        }));
    }

    /// A newer attempt of `id` owns the loaded data.
    fn reconnecting(&self, id: SubjectId) -> bool {
        let pending = self.with_tracker(|t| t.has_pending_attempt(id));
        if pending {
            debug!(subject = %id, "subject is reconnecting, keeping its data loaded");
        }
        pending
    }

    // ========================================================================
    // Enable / disable of an already running host (main thread)
    // ========================================================================

    /// Attaches a subject that was online before the system was enabled.
    pub fn attach_existing(
        &self,
        subject: &Arc<dyn HostSubject>,
        data: &SubjectData,
    ) -> Result<AttemptToken, ConnectionError> {
        let id = subject.id();
        self.inner.deps.delegates.attach(subject)?;
        let token = AttemptToken::new();
        self.with_tracker(|t| {
            let mut record = AttemptRecord::new(id, ConnectionState::Attached);
            record.attach = AttachState::Attached;
            t.attempts.insert(token, record);
            t.live.insert(id, token);
            t.seen.insert(id);
        });
        if self.inner.settings.auto_elevate {
            self.apply_elevation(subject.as_ref(), data);
        }
        Ok(token)
    }

    /// Immediate detach of every live session, used on disable.
    pub fn detach_all(&self) -> usize {
        let live: Vec<(SubjectId, AttemptToken)> = self.with_tracker(|t| t.live.drain().collect());
        let mut detached = 0;
        for (id, token) in live {
            self.with_tracker(|t| t.attempts.remove(&token));
            if let Some(subject) = self.inner.deps.host.online_subject(id) {
                self.release(subject.as_ref());
                detached += 1;
            }
        }
        self.with_tracker(|t| t.attempts.clear());
        detached
    }

    // ========================================================================
    // Elevation
    // ========================================================================

    /// Re-applies the auto-elevate policy. Main thread only.
    pub fn refresh_elevated(&self, subject: &dyn HostSubject) {
        if !self.inner.settings.auto_elevate {
            return;
        }
        match self.inner.deps.data.get_if_loaded(subject.id()) {
            Some(data) => self.apply_elevation(subject, &data),
            None => debug!(subject = %subject.id(), "no data loaded, elevation left unchanged"),
        }
    }

    fn apply_elevation(&self, subject: &dyn HostSubject, data: &SubjectData) {
        let contexts = self.inner.deps.contexts.contexts_for(subject);
        let elevated = self
            .inner
            .deps
            .resolver
            .resolve(data, &contexts, false, AUTO_ELEVATE_PERMISSION)
            .verdict()
            .as_bool();
        if subject.is_elevated() != elevated {
            debug!(subject = %subject.id(), elevated, "auto-elevate updated");
        }
        subject.set_elevated(elevated);
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn state_of(&self, token: AttemptToken) -> Option<ConnectionState> {
        self.with_tracker(|t| t.attempts.get(&token).map(|r| r.state))
    }

    pub fn attach_state_of(&self, token: AttemptToken) -> Option<AttachState> {
        self.with_tracker(|t| t.attempts.get(&token).map(|r| r.attach))
    }

    pub fn live_attempt(&self, id: SubjectId) -> Option<AttemptToken> {
        self.with_tracker(|t| t.live.get(&id).copied())
    }

    pub fn session_state(&self, id: SubjectId) -> Option<ConnectionState> {
        self.with_tracker(|t| {
            t.live
                .get(&id)
                .and_then(|token| t.attempts.get(token))
                .map(|r| r.state)
        })
    }

    pub fn was_seen(&self, id: SubjectId) -> bool {
        self.with_tracker(|t| t.seen.contains(&id))
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn register_stages(
        &self,
        pre_auth: &mut AsyncPhaseChain<PreAuthEvent>,
        finalize: &mut PhaseChain<FinalizeEvent>,
    ) {
        pre_auth.register(Priority::Low, Arc::new(PreAuthLoadStage(self.clone())));
        pre_auth.register(Priority::Monitor, Arc::new(PreAuthMonitorStage(self.clone())));
        finalize.register(Priority::Lowest, Arc::new(FinalizeAttachStage(self.clone())));
        finalize.register(Priority::Monitor, Arc::new(FinalizeMonitorStage(self.clone())));
    }
}

pub struct PreAuthLoadStage(ConnectionSynchronizer);

#[async_trait]
impl AsyncPhaseStage<PreAuthEvent> for PreAuthLoadStage {
    fn name(&self) -> &str {
        "permgate:pre-auth"
    }

    async fn run(&self, event: &PreAuthEvent, mut decision: DenyOnly<'_>) {
        if let Err(e) = self.0.pre_auth(event, &mut decision).await {
            debug!(attempt = %event.attempt, error = %e, "pre-auth ended without data");
        }
    }
}

pub struct PreAuthMonitorStage(ConnectionSynchronizer);

#[async_trait]
impl AsyncPhaseStage<PreAuthEvent> for PreAuthMonitorStage {
    fn name(&self) -> &str {
        "permgate:pre-auth-monitor"
    }

    async fn run(&self, event: &PreAuthEvent, mut decision: DenyOnly<'_>) {
        if let Err(e) = self.0.pre_auth_monitor(event, &mut decision) {
            debug!(attempt = %event.attempt, error = %e, "pre-auth result corrected");
        }
    }
}

pub struct FinalizeAttachStage(ConnectionSynchronizer);

impl PhaseStage<FinalizeEvent> for FinalizeAttachStage {
    fn name(&self) -> &str {
        "permgate:finalize"
    }

    fn run(&self, event: &FinalizeEvent, mut decision: DenyOnly<'_>) {
        if let Err(e) = self.0.finalize(event, &mut decision) {
            debug!(attempt = %event.attempt, error = %e, "finalize ended without attach");
        }
    }
}

pub struct FinalizeMonitorStage(ConnectionSynchronizer);

impl PhaseStage<FinalizeEvent> for FinalizeMonitorStage {
    fn name(&self) -> &str {
        "permgate:finalize-monitor"
    }

    fn run(&self, event: &FinalizeEvent, mut decision: DenyOnly<'_>) {
        if let Err(e) = self.0.finalize_monitor(event, &mut decision) {
            debug!(attempt = %event.attempt, error = %e, "finalize result corrected");
        }
    }
}
