use crate::model::{SubjectData, SubjectId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Diagnostic event emitted once per pre-auth outcome.
#[derive(Debug, Clone)]
pub struct LoginProcessEvent {
    pub subject: SubjectId,
    pub name: String,
    /// `None` when loading failed.
    pub data: Option<Arc<SubjectData>>,
    pub first_seen: bool,
    pub at: DateTime<Utc>,
}

pub trait ConnectionEventSink: Send + Sync {
    fn emit(&self, event: LoginProcessEvent);
}

pub struct NullEventSink;

impl ConnectionEventSink for NullEventSink {
    fn emit(&self, _event: LoginProcessEvent) {}
}

/// Fans events out to any number of subscribers. Events emitted while nobody
/// is subscribed are dropped.
#[derive(Clone)]
pub struct ChannelEventSink {
    tx: broadcast::Sender<LoginProcessEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoginProcessEvent> {
        self.tx.subscribe()
    }
}

impl ConnectionEventSink for ChannelEventSink {
    fn emit(&self, event: LoginProcessEvent) {
        let _ = self.tx.send(event);
    }
}
