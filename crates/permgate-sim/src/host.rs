//! An in-process host: one tick-driven main thread, tokio as the async pool.
//!
//! The "main thread" is whichever task drives the simulation; queued main
//! thread work only runs when the driver calls [`SimScheduler::tick`] or
//! [`SimScheduler::settle`].

use permgate_core::delegate::{CheckDelegate, DelegateSlot, SessionDelegateFactory, SharedSlot};
use permgate_core::host::{Host, HostSubject, IdentityVerification, Scheduler, Task};
use permgate_core::login::{
    AsyncPhaseChain, FinalizeEvent, LoginDecision, LoginResult, PhaseChain, PreAuthEvent,
};
use permgate_core::tristate::{ResultFactory, Tristate, TristateResult};
use permgate_core::{AttemptToken, SubjectId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const CONSOLE_SLOT: &str = "internal/console";

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Default)]
struct Queue {
    tick: u64,
    main: VecDeque<Task>,
    delayed: Vec<(u64, Task)>,
}

pub struct SimScheduler {
    runtime: Handle,
    queue: Mutex<Queue>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl SimScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            queue: Mutex::new(Queue::default()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_tick(&self) -> u64 {
        self.queue().tick
    }

    pub fn pending_delayed(&self) -> usize {
        self.queue().delayed.len()
    }

    /// Advances one tick: due delayed tasks move to the async pool, then the
    /// main queue is drained once.
    pub fn tick(&self) -> usize {
        let due = {
            let mut q = self.queue();
            q.tick += 1;
            let now = q.tick;
            let (due, later): (Vec<_>, Vec<_>) =
                std::mem::take(&mut q.delayed).into_iter().partition(|(at, _)| *at <= now);
            q.delayed = later;
            due
        };
        for (_, task) in due {
            self.run_async(task);
        }
        self.run_main()
    }

    /// Runs everything currently queued for the main thread.
    pub fn run_main(&self) -> usize {
        let tasks: Vec<Task> = self.queue().main.drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    /// Waits for the async pool and drains the main queue until both are
    /// quiet. Delayed tasks are left for later ticks.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                std::mem::take(&mut *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()));
            let had_async = !handles.is_empty();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "async task failed");
                }
            }
            if self.run_main() == 0 && !had_async {
                break;
            }
        }
    }
}

impl Scheduler for SimScheduler {
    fn run_async(&self, task: Task) {
        let handle = self.runtime.spawn_blocking(task);
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    fn run_sync(&self, task: Task) {
        self.queue().main.push_back(task);
    }

    fn run_async_delayed(&self, task: Task, ticks: u64) {
        let mut q = self.queue();
        let due = q.tick + ticks;
        q.delayed.push((due, task));
    }
}

// ============================================================================
// Delegates and subjects
// ============================================================================

/// The delegate a host installs by itself: a fixed answer for everything.
pub struct NativeDelegate {
    verdict: Tristate,
}

impl NativeDelegate {
    pub fn new(verdict: Tristate) -> Self {
        Self { verdict }
    }
}

impl CheckDelegate for NativeDelegate {
    fn check(&self, _permission: &str) -> TristateResult {
        ResultFactory::new("native", "host default").result(self.verdict)
    }
}

pub struct SimSubject {
    id: SubjectId,
    name: String,
    zone: RwLock<String>,
    elevated: AtomicBool,
    slot: SharedSlot,
}

impl SimSubject {
    pub fn new(id: SubjectId, name: &str, zone: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            zone: RwLock::new(zone.to_string()),
            elevated: AtomicBool::new(false),
            slot: SharedSlot::new(
                format!("subject/{name}"),
                Arc::new(NativeDelegate::new(Tristate::Undefined)),
            ),
        }
    }

    pub fn set_zone(&self, zone: &str) {
        *self.zone.write().unwrap_or_else(|e| e.into_inner()) = zone.to_string();
    }

    /// A check the way the host performs it: through whatever occupies the
    /// delegate slot.
    pub fn check(&self, permission: &str) -> TristateResult {
        match self.slot.get() {
            Ok(delegate) => delegate.check(permission),
            Err(e) => TristateResult::unresolved(e.to_string()),
        }
    }

    pub fn has_session_delegate(&self) -> bool {
        SessionDelegateFactory::is_attached(self)
    }

    pub fn current_delegate(&self) -> Option<Arc<dyn CheckDelegate>> {
        self.slot.get().ok()
    }
}

impl HostSubject for SimSubject {
    fn id(&self) -> SubjectId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn zone(&self) -> String {
        self.zone.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_elevated(&self) -> bool {
        self.elevated.load(Ordering::SeqCst)
    }

    fn set_elevated(&self, value: bool) {
        self.elevated.store(value, Ordering::SeqCst);
    }

    fn delegate_slot(&self) -> &dyn DelegateSlot {
        &self.slot
    }
}

// ============================================================================
// Host
// ============================================================================

pub struct ConnectRequest {
    pub id: SubjectId,
    pub name: String,
    pub zone: String,
    pub upstream_denial: Option<String>,
}

impl ConnectRequest {
    pub fn new(name: &str, zone: &str) -> Self {
        Self {
            id: SubjectId::offline(name),
            name: name.to_string(),
            zone: zone.to_string(),
            upstream_denial: None,
        }
    }

    pub fn denied_upstream(mut self, message: impl Into<String>) -> Self {
        self.upstream_denial = Some(message.into());
        self
    }
}

pub struct ConnectOutcome {
    pub attempt: AttemptToken,
    pub id: SubjectId,
    pub pre_auth: LoginResult,
    /// `None` when pre-auth denied and finalize never ran.
    pub finalize: Option<LoginResult>,
    pub subject: Option<Arc<SimSubject>>,
}

impl ConnectOutcome {
    pub fn is_allowed(&self) -> bool {
        self.finalize.as_ref().is_some_and(LoginResult::is_allowed)
    }

    pub fn denial(&self) -> Option<&str> {
        [Some(&self.pre_auth), self.finalize.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|r| match r {
                LoginResult::Denied { message, .. } => Some(message.as_str()),
                LoginResult::Allowed => None,
            })
    }
}

type DisconnectListener = Arc<dyn Fn(Arc<dyn HostSubject>) + Send + Sync>;

pub struct SimHost {
    scheduler: Arc<SimScheduler>,
    identity: IdentityVerification,
    zones: Vec<String>,
    subjects: RwLock<HashMap<SubjectId, Arc<SimSubject>>>,
    actors: RwLock<HashMap<String, Arc<SharedSlot>>>,
    pre_auth: RwLock<Arc<AsyncPhaseChain<PreAuthEvent>>>,
    finalize: RwLock<Arc<PhaseChain<FinalizeEvent>>>,
    disconnect_listeners: RwLock<Vec<DisconnectListener>>,
    stopping: AtomicBool,
}

impl SimHost {
    /// Must be called inside a tokio runtime.
    pub fn new(identity: IdentityVerification, zones: Vec<String>) -> Arc<Self> {
        let console: Arc<SharedSlot> = Arc::new(SharedSlot::new(
            CONSOLE_SLOT,
            Arc::new(NativeDelegate::new(Tristate::Allow)),
        ));
        Arc::new(Self {
            scheduler: Arc::new(SimScheduler::new(Handle::current())),
            identity,
            zones,
            subjects: RwLock::new(HashMap::new()),
            actors: RwLock::new([(CONSOLE_SLOT.to_string(), console)].into_iter().collect()),
            pre_auth: RwLock::new(Arc::new(AsyncPhaseChain::new())),
            finalize: RwLock::new(Arc::new(PhaseChain::new())),
            disconnect_listeners: RwLock::new(Vec::new()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn sim_scheduler(&self) -> &Arc<SimScheduler> {
        &self.scheduler
    }

    pub fn console(&self) -> Option<Arc<SharedSlot>> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(CONSOLE_SLOT)
            .cloned()
    }

    pub fn remove_actor_slot(&self, name: &str) -> Option<Arc<SharedSlot>> {
        self.actors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    /// Replaces a slot's occupant the way a third-party extension would.
    pub fn replace_actor_delegate(&self, name: &str, delegate: Arc<dyn CheckDelegate>) -> bool {
        let actors = self.actors.read().unwrap_or_else(|e| e.into_inner());
        match actors.get(name) {
            Some(slot) => slot.set(delegate).is_ok(),
            None => false,
        }
    }

    /// Copy-on-write edit of both phase chains.
    pub fn with_phases(
        &self,
        edit: impl FnOnce(&mut AsyncPhaseChain<PreAuthEvent>, &mut PhaseChain<FinalizeEvent>),
    ) {
        let mut pre = self.pre_auth.write().unwrap_or_else(|e| e.into_inner());
        let mut fin = self.finalize.write().unwrap_or_else(|e| e.into_inner());
        let mut next_pre = (**pre).clone();
        let mut next_fin = (**fin).clone();
        edit(&mut next_pre, &mut next_fin);
        *pre = Arc::new(next_pre);
        *fin = Arc::new(next_fin);
    }

    pub fn on_disconnect(&self, listener: impl Fn(Arc<dyn HostSubject>) + Send + Sync + 'static) {
        self.disconnect_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Drops every registered stage and listener.
    pub fn clear_listeners(&self) {
        self.with_phases(|pre, fin| {
            *pre = AsyncPhaseChain::new();
            *fin = PhaseChain::new();
        });
        self.disconnect_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn set_stopping(&self, stopping: bool) {
        self.stopping.store(stopping, Ordering::SeqCst);
    }

    pub fn subject(&self, id: SubjectId) -> Option<Arc<SimSubject>> {
        self.subjects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    /// Puts a subject online without running the connection phases, as if it
    /// had joined before the permission system was loaded.
    pub fn add_online(&self, subject: Arc<SimSubject>) {
        self.subjects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subject.id(), subject);
    }

    /// Runs pre-auth on the async pool, then finalize on the calling task.
    pub async fn connect(&self, request: ConnectRequest) -> ConnectOutcome {
        let attempt = AttemptToken::new();
        let event = PreAuthEvent {
            attempt,
            subject_id: request.id,
            name: request.name.clone(),
        };
        let mut decision = match &request.upstream_denial {
            Some(message) => LoginDecision::denied("upstream", message.clone()),
            None => LoginDecision::new(),
        };
        let chain = self
            .pre_auth
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let pre_auth = match tokio::spawn(async move {
            chain.run(&event, &mut decision).await;
            decision.into_result()
        })
        .await
        {
            Ok(result) => result,
            Err(e) => LoginResult::Denied {
                by: "host".to_string(),
                message: format!("pre-auth task failed: {e}"),
            },
        };

        if !pre_auth.is_allowed() {
            debug!(subject = %request.id, "connection denied at pre-auth");
            return ConnectOutcome {
                attempt,
                id: request.id,
                pre_auth,
                finalize: None,
                subject: None,
            };
        }

        let subject = Arc::new(SimSubject::new(request.id, &request.name, &request.zone));
        let mut decision = LoginDecision::new();
        let chain = self
            .finalize
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        chain.run(
            &FinalizeEvent {
                attempt,
                subject: subject.clone(),
            },
            &mut decision,
        );
        let finalize = decision.into_result();
        let allowed = finalize.is_allowed();
        if allowed {
            self.add_online(subject.clone());
        }

        ConnectOutcome {
            attempt,
            id: request.id,
            pre_auth,
            finalize: Some(finalize),
            subject: allowed.then_some(subject),
        }
    }

    /// Takes the subject offline and notifies disconnect listeners.
    pub fn disconnect(&self, id: SubjectId) -> bool {
        let subject = self
            .subjects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        let Some(subject) = subject else {
            return false;
        };
        let listeners: Vec<DisconnectListener> = self
            .disconnect_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(subject.clone());
        }
        true
    }
}

impl Host for SimHost {
    fn scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    fn identity_verification(&self) -> IdentityVerification {
        self.identity
    }

    fn online_subject(&self, id: SubjectId) -> Option<Arc<dyn HostSubject>> {
        self.subject(id).map(|s| s as Arc<dyn HostSubject>)
    }

    fn online_subjects(&self) -> Vec<Arc<dyn HostSubject>> {
        self.subjects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.clone() as Arc<dyn HostSubject>)
            .collect()
    }

    fn actor_slot(&self, name: &str) -> Option<Arc<dyn DelegateSlot>> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|s| s.clone() as Arc<dyn DelegateSlot>)
    }

    fn zones(&self) -> Vec<String> {
        self.zones.clone()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_delayed_tasks_wait_for_their_tick() {
        let scheduler = SimScheduler::new(Handle::current());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler.run_async_delayed(
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
            2,
        );

        scheduler.tick();
        scheduler.settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending_delayed(), 1);

        scheduler.tick();
        scheduler.settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.current_tick(), 2);
    }

    #[tokio::test]
    async fn test_settle_runs_sync_work_queued_from_async() {
        let scheduler = Arc::new(SimScheduler::new(Handle::current()));
        let hits = Arc::new(AtomicUsize::new(0));
        let (s, h) = (scheduler.clone(), hits.clone());
        scheduler.run_async(Box::new(move || {
            s.run_sync(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        scheduler.settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_native_delegate_is_not_a_layer() {
        let native = NativeDelegate::new(Tristate::Allow);
        assert!(native.layer().is_none());
        assert!(native.has_permission("anything"));
    }
}
