//! Process exit codes. Scripts depend on these; keep them stable.

pub const EXIT_SUCCESS: i32 = 0;
/// A scenario ran but at least one step failed its expectation.
pub const EXIT_SCENARIO_FAILED: i32 = 1;
/// Config or scenario could not be loaded or is invalid.
pub const EXIT_CONFIG_ERROR: i32 = 2;
