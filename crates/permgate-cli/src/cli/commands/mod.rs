use super::args::*;

pub mod config;
pub mod contexts;
pub mod simulate;

use crate::exit_codes::EXIT_SUCCESS;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Simulate(args) => simulate::run(args).await,
        Command::Contexts(args) => contexts::run(args),
        Command::Config(args) => config::run(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_SUCCESS)
        }
    }
}
