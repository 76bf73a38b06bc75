//! Priority-ordered phase chains.
//!
//! Stages run in ascending [`Priority`]; registration order breaks ties.
//! Regular stages only get a [`DenyOnly`] view. Legacy listeners get the raw
//! [`LoginDecision`] and are the only code able to re-allow a denied
//! connection, which is what the `Monitor` stages watch for.

use super::decision::{DenyOnly, LoginDecision};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    /// Observes the final state; should not change it except to restore an
    /// invariant.
    Monitor,
}

pub trait PhaseStage<E>: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, event: &E, decision: DenyOnly<'_>);
}

#[async_trait]
pub trait AsyncPhaseStage<E: Sync>: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, event: &E, decision: DenyOnly<'_>);
}

pub type LegacyListener<E> = Arc<dyn Fn(&E, &mut LoginDecision) + Send + Sync>;

enum Entry<S: ?Sized, E> {
    Stage(Arc<S>),
    Legacy { name: String, listener: LegacyListener<E> },
}

impl<S: ?Sized, E> Clone for Entry<S, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Stage(s) => Self::Stage(s.clone()),
            Self::Legacy { name, listener } => Self::Legacy {
                name: name.clone(),
                listener: listener.clone(),
            },
        }
    }
}

struct Entries<S: ?Sized, E> {
    entries: Vec<(Priority, Entry<S, E>)>,
}

impl<S: ?Sized, E> Entries<S, E> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, priority: Priority, entry: Entry<S, E>) {
        let at = self.entries.partition_point(|(p, _)| *p <= priority);
        self.entries.insert(at, (priority, entry));
    }

    fn names(&self, stage_name: impl Fn(&S) -> &str) -> Vec<(Priority, String)> {
        self.entries
            .iter()
            .map(|(p, e)| {
                let name = match e {
                    Entry::Stage(s) => stage_name(s).to_string(),
                    Entry::Legacy { name, .. } => name.clone(),
                };
                (*p, name)
            })
            .collect()
    }
}

impl<S: ?Sized, E> Clone for Entries<S, E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

/// Synchronous chain, run on the host main thread.
pub struct PhaseChain<E> {
    inner: Entries<dyn PhaseStage<E>, E>,
}

impl<E> PhaseChain<E> {
    pub fn new() -> Self {
        Self {
            inner: Entries::new(),
        }
    }

    pub fn register(&mut self, priority: Priority, stage: Arc<dyn PhaseStage<E>>) {
        self.inner.insert(priority, Entry::Stage(stage));
    }

    pub fn register_legacy(
        &mut self,
        priority: Priority,
        name: impl Into<String>,
        listener: impl Fn(&E, &mut LoginDecision) + Send + Sync + 'static,
    ) {
        self.inner.insert(
            priority,
            Entry::Legacy {
                name: name.into(),
                listener: Arc::new(listener),
            },
        );
    }

    pub fn stages(&self) -> Vec<(Priority, String)> {
        self.inner.names(|s| s.name())
    }

    pub fn run(&self, event: &E, decision: &mut LoginDecision) {
        for (_, entry) in &self.inner.entries {
            match entry {
                Entry::Stage(stage) => stage.run(event, DenyOnly::new(stage.name(), decision)),
                Entry::Legacy { listener, .. } => listener(event, decision),
            }
        }
    }
}

impl<E> Default for PhaseChain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for PhaseChain<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Asynchronous chain, run on the async pool. Stages are awaited one after
/// another.
pub struct AsyncPhaseChain<E: Sync> {
    inner: Entries<dyn AsyncPhaseStage<E>, E>,
}

impl<E: Sync> AsyncPhaseChain<E> {
    pub fn new() -> Self {
        Self {
            inner: Entries::new(),
        }
    }

    pub fn register(&mut self, priority: Priority, stage: Arc<dyn AsyncPhaseStage<E>>) {
        self.inner.insert(priority, Entry::Stage(stage));
    }

    pub fn register_legacy(
        &mut self,
        priority: Priority,
        name: impl Into<String>,
        listener: impl Fn(&E, &mut LoginDecision) + Send + Sync + 'static,
    ) {
        self.inner.insert(
            priority,
            Entry::Legacy {
                name: name.into(),
                listener: Arc::new(listener),
            },
        );
    }

    pub fn stages(&self) -> Vec<(Priority, String)> {
        self.inner.names(|s| s.name())
    }

    pub async fn run(&self, event: &E, decision: &mut LoginDecision) {
        for (_, entry) in &self.inner.entries {
            match entry {
                Entry::Stage(stage) => {
                    stage
                        .run(event, DenyOnly::new(stage.name(), decision))
                        .await
                }
                Entry::Legacy { listener, .. } => listener(event, decision),
            }
        }
    }
}

impl<E: Sync> Default for AsyncPhaseChain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Sync> Clone for AsyncPhaseChain<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
