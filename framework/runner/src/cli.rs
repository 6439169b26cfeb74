use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(about, long_about = None)]
pub struct LoadTestCli {
    /// The configuration file that defines the scenarios to run
    #[clap(short, long, default_value = "configurations/main.json")]
    pub config: PathBuf,

    /// SQLite database to record results in. Overrides `database_path` from the configuration file.
    #[clap(long)]
    pub database: Option<PathBuf>,

    /// Only run the named scenario. Can be given more than once, for example
    /// `--scenario=speed-eu --scenario=speed-us`.
    ///
    /// Scenarios are matched by their `id` in the configuration file and must also be enabled.
    #[clap(long, short)]
    pub scenario: Vec<String>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}
