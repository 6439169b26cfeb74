mod cli;
mod config;
mod context;
mod executor;
mod handler;
mod init;
mod monitor;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod shutdown;
mod types;

pub mod prelude {
    pub use crate::cli::LoadTestCli;
    pub use crate::config::{ConfigError, GlobalSettings, LoadTestConfig, ScenarioConfig};
    pub use crate::context::{PendingJob, SchedulerContext};
    pub use crate::handler::{
        FieldValue, HandlerRegistry, Parameters, ProtocolHandler, ResultRecord,
    };
    pub use crate::init::init;
    pub use crate::run::{run, run_with, RunReport, ScenarioReport};
    pub use crate::schedule::{Schedule, ScheduleConfig, ScheduleError, StartAt, Trigger};
    pub use crate::scheduler::{Finalized, Scheduler};
    pub use crate::types::LoadTestResult;
}
