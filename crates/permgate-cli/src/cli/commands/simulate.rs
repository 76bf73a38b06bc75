use crate::cli::args::SimulateArgs;
use crate::exit_codes::{EXIT_CONFIG_ERROR, EXIT_SCENARIO_FAILED, EXIT_SUCCESS};
use anyhow::Result;
use permgate_core::PermGateConfig;
use permgate_sim::{run_scenario, Scenario};
use tracing::info;

pub async fn run(args: SimulateArgs) -> Result<i32> {
    let scenario = match Scenario::from_file(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Config error: {e:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let config = match args.config.as_deref() {
        Some(path) => match PermGateConfig::load(Some(path)) {
            Ok(c) => Some(c),
            Err(e) => {
                eprintln!("Config error: {e:#}");
                return Ok(EXIT_CONFIG_ERROR);
            }
        },
        None => None,
    };

    info!(scenario = %scenario.name, file = %args.file.display(), "running scenario");
    let report = run_scenario(&scenario, config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }

    if report.is_success() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_SCENARIO_FAILED)
    }
}
