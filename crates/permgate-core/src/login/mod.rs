//! Connection lifecycle.
//!
//! The host authorizes a connection in two uncoordinated phases: an async
//! pre-auth phase on its worker pool and a sync finalize phase on the main
//! thread. Both are modelled as priority-ordered chains; the
//! [`ConnectionSynchronizer`] registers its stages into them and owns the
//! per-attempt state machine.

mod chain;
mod decision;
mod events;
mod gate;
mod loader;
mod state;
mod synchronizer;

pub use chain::{AsyncPhaseChain, AsyncPhaseStage, LegacyListener, PhaseChain, PhaseStage, Priority};
pub use decision::{DenyOnly, LoginDecision, LoginResult};
pub use events::{ChannelEventSink, ConnectionEventSink, LoginProcessEvent, NullEventSink};
pub use gate::EnableGate;
pub use loader::SubjectLoader;
pub use state::{AttachState, ConnectionState};
pub use synchronizer::{
    ConnectionSynchronizer, FinalizeAttachStage, FinalizeEvent, FinalizeMonitorStage,
    PreAuthEvent, PreAuthLoadStage, PreAuthMonitorStage, SyncDeps, SyncSettings,
    AUTO_ELEVATE_PERMISSION,
};
