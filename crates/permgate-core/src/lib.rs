//! Permission resolution and connection lifecycle synchronization for
//! multi-user servers.
//!
//! The host is reached only through the traits in [`host`]; everything else
//! here is owned state passed in at construction.

pub mod config;
pub mod context;
pub mod delegate;
pub mod errors;
pub mod host;
pub mod login;
pub mod messages;
pub mod model;
pub mod platform;
pub mod processor;
pub mod resolver;
pub mod service;
pub mod tristate;

pub use config::PermGateConfig;
pub use errors::{ConnectionError, GateError, InjectionError, LoadError, TransitionError};
pub use model::{AttemptToken, InstanceId, PermissionNode, SubjectData, SubjectId};
pub use platform::{PermGate, PermGateBuilder};
pub use tristate::{Tristate, TristateResult};
