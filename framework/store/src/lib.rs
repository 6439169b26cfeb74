//! Storage for scenarios, runs, raw metric samples, expectation results and scenario summaries.
//!
//! The scheduler only talks to a [MetricStore]. Two implementations are provided: an
//! [InMemoryStore] which is useful for tests and short lived workers, and a [SqliteStore] for
//! durable results that can be inspected after the run.

mod error;
mod memory;
mod sqlite;

use load_test_core::prelude::{RunId, ScenarioId};
use load_test_model::{ExpectationResult, RawMetricRow, ScenarioSummary, TestRun};

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Operations required from durable storage.
///
/// Every write is atomic with respect to itself. In particular a call to
/// [MetricStore::insert_raw_metrics_batch] either stores every sample of the batch or none of
/// them. Nothing spanning more than one call is transactional.
pub trait MetricStore: Send + Sync {
    /// Insert a scenario, replacing the stored configuration snapshot if it already exists.
    fn insert_scenario(
        &self,
        scenario_id: &ScenarioId,
        protocol: &str,
        config_snapshot: &serde_json::Value,
    ) -> StoreResult<()>;

    fn insert_test_run(&self, run: &TestRun) -> StoreResult<()>;

    /// Insert the samples produced by one result record of a run, all with the same timestamp.
    fn insert_raw_metrics_batch(&self, run_id: &RunId, metrics: &[(String, f64)])
        -> StoreResult<()>;

    fn insert_result_log(&self, result: &ExpectationResult) -> StoreResult<()>;

    fn raw_metrics_for_run(&self, run_id: &RunId) -> StoreResult<Vec<RawMetricRow>>;

    /// All samples of every run that belongs to the scenario.
    fn raw_metrics_for_scenario(&self, scenario_id: &ScenarioId)
        -> StoreResult<Vec<RawMetricRow>>;

    /// Insert or fully replace the summary keyed by `(scenario_id, metric_name)`.
    fn upsert_scenario_summary(&self, summary: &ScenarioSummary) -> StoreResult<()>;

    /// Any run of the scenario, used to attach scenario scope results to a run.
    fn find_any_run_id(&self, scenario_id: &ScenarioId) -> StoreResult<Option<RunId>>;

    /// Runs of the scenario, oldest first.
    fn test_runs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<TestRun>>;

    /// Expectation results of the scenario in the order they were recorded.
    fn result_logs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ExpectationResult>>;

    /// Summaries of the scenario, ordered by metric name.
    fn scenario_summaries(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ScenarioSummary>>;
}

pub(crate) fn validate_batch(metrics: &[(String, f64)]) -> StoreResult<()> {
    if metrics.iter().any(|(name, _)| name.is_empty()) {
        return Err(StoreError::InvalidRecord(
            "metric name must not be empty".to_string(),
        ));
    }

    Ok(())
}
