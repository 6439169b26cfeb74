use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use load_test_core::prelude::{ScenarioId, ShutdownSignalError};
use load_test_instruments::report::print_scenario_report;
use load_test_model::{append_records, ExpectationResult, ScenarioSummary};
use load_test_store::{InMemoryStore, MetricStore, SqliteStore};
use tokio::time::Instant;

use crate::cli::LoadTestCli;
use crate::config::LoadTestConfig;
use crate::executor::Executor;
use crate::handler::HandlerRegistry;
use crate::init::init;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scheduler::{Finalized, Scheduler};
use crate::shutdown::start_shutdown_listener;

const SUMMARY_FILE: &str = "scenario_summary.jsonl";
const RESULTS_FILE: &str = "expectation_results.jsonl";

/// The outcome of a scenario at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub scenario_id: ScenarioId,
    pub name: String,
    pub summaries: Vec<ScenarioSummary>,
    /// Every verdict recorded for the scenario, per-iteration and scenario scope.
    pub results: Vec<ExpectationResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Whether every scenario finished before the deadline and without an interruption.
    pub completed: bool,
    pub scenarios: Vec<ScenarioReport>,
}

/// Run the configuration named on the command line with the given protocol handlers.
pub fn run(handlers: HandlerRegistry) -> anyhow::Result<()> {
    let cli = init();
    let report = run_with(cli, handlers)?;

    if !report.completed {
        log::warn!("The run ended before all scenarios had completed");
    }

    Ok(())
}

/// Run a configuration to completion.
///
/// Every enabled scenario is scheduled, then the run waits until the last recurring window has
/// ended and no firings are in progress, or until the completion buffer after the planned end has
/// passed. Scenario scope expectations are evaluated once all firings have stopped.
pub fn run_with(cli: LoadTestCli, handlers: HandlerRegistry) -> anyhow::Result<RunReport> {
    let mut config = LoadTestConfig::load(&cli.config)?;
    if let Some(database) = cli.database.clone() {
        config.global_settings.database_path = Some(database);
    }

    let store = open_store(config.global_settings.database_path.as_deref())?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(runtime.handle());
    let executor = Executor::new(runtime, shutdown_handle.clone());

    let scheduler = Scheduler::new(store.clone(), handlers, executor.handle().clone());

    for name in &cli.scenario {
        if !config.enabled_scenarios().any(|s| &s.id == name) {
            log::warn!("Scenario [{}] is not an enabled scenario, ignoring", name);
        }
    }

    let mut scenario_ids = Vec::new();
    for scenario in config
        .enabled_scenarios()
        .filter(|s| cli.scenario.is_empty() || cli.scenario.contains(&s.id))
    {
        let scenario_id = ScenarioId::generate();
        // Jobs are only launched by `start`, so a scenario is recorded before it can fire.
        if let Err(e) = scheduler.schedule(scenario_id.clone(), scenario.clone()) {
            log::error!("Skipping scenario {}: {}", scenario.id, e);
            continue;
        }

        let snapshot = serde_json::to_value(scenario)
            .with_context(|| format!("Failed to snapshot scenario {}", scenario.id))?;
        store
            .insert_scenario(&scenario_id, &scenario.protocol, &snapshot)
            .with_context(|| format!("Failed to record scenario {}", scenario.id))?;
        scenario_ids.push(scenario_id);
    }

    if scenario_ids.is_empty() {
        log::warn!("No scenarios to run");
        shutdown_handle.shutdown();
        return Ok(RunReport {
            completed: true,
            scenarios: Vec::new(),
        });
    }

    log::info!("Running {} scenarios", scenario_ids.len());
    scheduler.start();

    let buffer = Duration::try_from_secs_f64(config.global_settings.completion_buffer_minutes * 60.0)
        .unwrap_or_default();
    let now = Instant::now();
    let deadline = scheduler.planned_end(&scenario_ids).unwrap_or(now).max(now) + buffer;

    if !cli.no_progress {
        start_progress(
            deadline.saturating_duration_since(now),
            shutdown_handle.new_listener(),
        )?;
    }

    // Protocol handlers measure from this process, so report when it is too busy to trust them.
    start_monitor(shutdown_handle.new_listener())?;

    let completed = match executor.execute_in_place(async {
        Ok(scheduler.wait_for_completion(&scenario_ids, deadline).await)
    }) {
        Ok(true) => true,
        Ok(false) => {
            log::warn!("Not all scenarios completed within the completion buffer");
            false
        }
        Err(e) if e.is::<ShutdownSignalError>() => {
            log::warn!("Run interrupted, stopping scenarios");
            false
        }
        Err(e) => return Err(e),
    };

    // Firings in progress are allowed to finish so that their results are recorded.
    executor.execute_to_completion(scheduler.shutdown());

    let mut report = RunReport {
        completed,
        scenarios: Vec::with_capacity(scenario_ids.len()),
    };
    for scenario_id in &scenario_ids {
        let name = scheduler
            .config(scenario_id)
            .map(|c| c.id.clone())
            .unwrap_or_default();

        let Finalized { summaries, .. } = match scheduler.finalize(scenario_id) {
            Ok(finalized) => finalized,
            Err(e) => {
                log::error!("Failed to finalize scenario {}: {:?}", name, e);
                continue;
            }
        };
        let results = store
            .result_logs(scenario_id)
            .with_context(|| format!("Failed to read results of scenario {}", name))?;

        print_scenario_report(scenario_id, &name, &summaries, &results);

        report.scenarios.push(ScenarioReport {
            scenario_id: scenario_id.clone(),
            name,
            summaries,
            results,
        });
    }

    if let Err(e) = write_report(&config.global_settings.report_path, &report) {
        log::error!("Failed to write report: {:?}", e);
    }

    // Stops the progress bar and the resource monitor.
    shutdown_handle.shutdown();

    Ok(report)
}

fn open_store(database_path: Option<&Path>) -> anyhow::Result<Arc<dyn MetricStore>> {
    match database_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
            log::info!("Recording results in {}", path.display());
            Ok(Arc::new(SqliteStore::open(path).with_context(|| {
                format!("Failed to open database {}", path.display())
            })?))
        }
        None => {
            log::info!("No database configured, results are kept in memory");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Append the summaries and verdicts of the run to the report directory.
fn write_report(report_path: &Path, report: &RunReport) -> anyhow::Result<()> {
    std::fs::create_dir_all(report_path).with_context(|| {
        format!("Failed to create report directory {}", report_path.display())
    })?;

    let summaries = report
        .scenarios
        .iter()
        .flat_map(|s| s.summaries.iter().cloned())
        .collect::<Vec<_>>();
    append_records(&summaries, &report_path.join(SUMMARY_FILE))?;

    let results = report
        .scenarios
        .iter()
        .flat_map(|s| s.results.iter().cloned())
        .collect::<Vec<_>>();
    append_records(&results, &report_path.join(RESULTS_FILE))?;

    log::info!("Report written to {}", report_path.display());

    Ok(())
}
