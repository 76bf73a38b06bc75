//! In-process host simulation for exercising the connection lifecycle
//! end to end, plus a YAML scenario runner on top of it.

pub mod host;
pub mod report;
pub mod scenario;
pub mod simulation;
pub mod source;

pub use host::{
    ConnectOutcome, ConnectRequest, NativeDelegate, SimHost, SimSubject, CONSOLE_SLOT,
};
pub use report::{ScenarioReport, StepResult, StepStatus};
pub use scenario::{run_scenario, Scenario, Step};
pub use simulation::{SimOptions, Simulation};
pub use source::InMemoryDataSource;
