use crate::cli::LoadTestCli;
use clap::Parser;

/// Initialise the CLI and logging for the load test runner.
pub fn init() -> LoadTestCli {
    env_logger::init();

    LoadTestCli::parse()
}
