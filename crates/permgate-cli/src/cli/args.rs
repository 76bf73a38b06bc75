use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "permgate",
    version,
    about = "Permission resolution and connection lifecycle tooling for multi-user servers"
)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `permgate_core=trace`
    #[arg(long, global = true, env = "PERMGATE_LOG", default_value = "info")]
    pub log: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a YAML lifecycle scenario against the simulated host
    Simulate(SimulateArgs),
    /// Show the contexts a subject would get in a zone
    Contexts(ContextsArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
    Version,
}

#[derive(clap::Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Scenario file
    pub file: PathBuf,

    /// Config file; replaces the scenario's own `config` block
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ContextsArgs {
    /// Zone the subject is in
    pub zone: String,

    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Zones known to the host, for the potential-contexts estimate
    #[arg(long, value_delimiter = ',', default_value = "world")]
    pub zones: Vec<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ConfigArgs {
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}
