use crate::cli::args::ConfigArgs;
use crate::exit_codes::{EXIT_CONFIG_ERROR, EXIT_SUCCESS};
use anyhow::Result;
use permgate_core::PermGateConfig;

/// Prints the configuration after file and `PERMGATE_*` overrides.
pub fn run(args: ConfigArgs) -> Result<i32> {
    let config = match PermGateConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e:#}");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(EXIT_SUCCESS)
}
