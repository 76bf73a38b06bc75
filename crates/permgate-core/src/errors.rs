use crate::login::ConnectionState;
use crate::model::{AttemptToken, SubjectId};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the data source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to load data for {id}: {detail}")]
    Backend { id: SubjectId, detail: String },

    #[error("load task interrupted: {0}")]
    Interrupted(String),
}

/// Structural access to a host slot failed. Treated as "feature unavailable"
/// by the monitoring injector and as an attach failure at finalize.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InjectionError {
    #[error("slot '{0}' is not present on this host")]
    SlotMissing(String),

    #[error("slot '{slot}' is incompatible: {detail}")]
    Incompatible { slot: String, detail: String },

    #[error("slot '{0}' lock poisoned")]
    Poisoned(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("enable gate did not open within {0:?}")]
    Timeout(Duration),

    #[error("enable gate dropped before opening")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid connection transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Outcome classes of the connection phases. Every variant raised during
/// pre-auth or finalize has already been resolved to a deny on the decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection was denied upstream before data loading")]
    UpstreamDenied,

    #[error(transparent)]
    LoadFailure(#[from] LoadError),

    #[error("no pre-loaded data for {id} (seen earlier this run: {seen_before})")]
    MissingDataAtFinalize { id: SubjectId, seen_before: bool },

    #[error("failed to attach session delegate: {0}")]
    AttachFailure(#[from] InjectionError),

    #[error("connection for {0} was re-allowed after being denied")]
    ReallowedAfterDeny(SubjectId),

    #[error("unknown connection attempt {0}")]
    UnknownAttempt(AttemptToken),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
