use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use load_test_core::prelude::{RunId, ScenarioId};
use load_test_model::{ExpectationResult, RawMetricRow, ScenarioSummary, TestRun};
use parking_lot::RwLock;

use crate::{validate_batch, MetricStore, StoreError, StoreResult};

// Mirrors the `scenarios` table, nothing reads it back outside tests.
#[allow(dead_code)]
#[derive(Debug, Clone)]
struct StoredScenario {
    protocol: String,
    config_snapshot: serde_json::Value,
}

#[derive(Debug, Default)]
struct Tables {
    scenarios: HashMap<ScenarioId, StoredScenario>,
    test_runs: Vec<TestRun>,
    run_ids: HashSet<RunId>,
    raw_metrics: Vec<(RunId, RawMetricRow)>,
    results_log: Vec<ExpectationResult>,
    scenario_summary: BTreeMap<(ScenarioId, String), ScenarioSummary>,
}

/// A [MetricStore] that keeps everything in memory for the lifetime of the process.
///
/// Each operation holds the table lock for its whole duration, which makes every write atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricStore for InMemoryStore {
    fn insert_scenario(
        &self,
        scenario_id: &ScenarioId,
        protocol: &str,
        config_snapshot: &serde_json::Value,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write();
        match tables.scenarios.get_mut(scenario_id) {
            // Like the durable store, only the snapshot is replaced on conflict.
            Some(existing) => existing.config_snapshot = config_snapshot.clone(),
            None => {
                tables.scenarios.insert(
                    scenario_id.clone(),
                    StoredScenario {
                        protocol: protocol.to_string(),
                        config_snapshot: config_snapshot.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn insert_test_run(&self, run: &TestRun) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.run_ids.insert(run.run_id.clone()) {
            return Err(StoreError::InvalidRecord(format!(
                "run {} already exists",
                run.run_id
            )));
        }
        tables.test_runs.push(run.clone());
        Ok(())
    }

    fn insert_raw_metrics_batch(
        &self,
        run_id: &RunId,
        metrics: &[(String, f64)],
    ) -> StoreResult<()> {
        validate_batch(metrics)?;

        let mut tables = self.tables.write();
        if !tables.run_ids.contains(run_id) {
            return Err(StoreError::UnknownRun(run_id.clone()));
        }

        let timestamp = Utc::now();
        tables
            .raw_metrics
            .extend(metrics.iter().map(|(metric_name, value)| {
                (
                    run_id.clone(),
                    RawMetricRow {
                        metric_name: metric_name.clone(),
                        metric_value: value.to_string(),
                        timestamp,
                    },
                )
            }));
        Ok(())
    }

    fn insert_result_log(&self, result: &ExpectationResult) -> StoreResult<()> {
        self.tables.write().results_log.push(result.clone());
        Ok(())
    }

    fn raw_metrics_for_run(&self, run_id: &RunId) -> StoreResult<Vec<RawMetricRow>> {
        Ok(self
            .tables
            .read()
            .raw_metrics
            .iter()
            .filter(|(id, _)| id == run_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn raw_metrics_for_scenario(
        &self,
        scenario_id: &ScenarioId,
    ) -> StoreResult<Vec<RawMetricRow>> {
        let tables = self.tables.read();
        let runs = tables
            .test_runs
            .iter()
            .filter(|run| &run.scenario_id == scenario_id)
            .map(|run| &run.run_id)
            .collect::<HashSet<_>>();

        Ok(tables
            .raw_metrics
            .iter()
            .filter(|(id, _)| runs.contains(id))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn upsert_scenario_summary(&self, summary: &ScenarioSummary) -> StoreResult<()> {
        self.tables.write().scenario_summary.insert(
            (summary.scenario_id.clone(), summary.metric_name.clone()),
            summary.clone(),
        );
        Ok(())
    }

    fn find_any_run_id(&self, scenario_id: &ScenarioId) -> StoreResult<Option<RunId>> {
        Ok(self
            .tables
            .read()
            .test_runs
            .iter()
            .find(|run| &run.scenario_id == scenario_id)
            .map(|run| run.run_id.clone()))
    }

    fn test_runs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<TestRun>> {
        let mut runs = self
            .tables
            .read()
            .test_runs
            .iter()
            .filter(|run| &run.scenario_id == scenario_id)
            .cloned()
            .collect::<Vec<_>>();
        runs.sort_by_key(|run| run.start_time);
        Ok(runs)
    }

    fn result_logs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ExpectationResult>> {
        Ok(self
            .tables
            .read()
            .results_log
            .iter()
            .filter(|result| &result.scenario_id == scenario_id)
            .cloned()
            .collect())
    }

    fn scenario_summaries(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ScenarioSummary>> {
        Ok(self
            .tables
            .read()
            .scenario_summary
            .values()
            .filter(|summary| &summary.scenario_id == scenario_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_scenario_keeps_protocol_and_replaces_snapshot() {
        let store = InMemoryStore::new();
        let id = ScenarioId::from("s1");

        store
            .insert_scenario(&id, "speed_test", &json!({"v": 1}))
            .unwrap();
        store
            .insert_scenario(&id, "web_browsing", &json!({"v": 2}))
            .unwrap();

        let tables = store.tables.read();
        let stored = &tables.scenarios[&id];
        assert_eq!("speed_test", stored.protocol);
        assert_eq!(json!({"v": 2}), stored.config_snapshot);
    }

    #[test]
    fn duplicate_run_is_rejected() {
        let store = InMemoryStore::new();
        let run = TestRun {
            run_id: RunId::from("r1"),
            scenario_id: ScenarioId::from("s1"),
            start_time: Utc::now(),
            worker_node: "node".to_string(),
        };

        store.insert_test_run(&run).unwrap();
        assert!(store.insert_test_run(&run).is_err());
    }
}
