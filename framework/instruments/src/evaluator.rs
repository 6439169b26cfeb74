use std::sync::Arc;

use load_test_core::prelude::{RunId, ScenarioId};
use load_test_model::{EvaluationScope, Expectation, ExpectationResult, Verdict};
use load_test_store::{MetricStore, StoreResult};

use crate::aggregator::{select_from, MetricsAggregator};
use crate::units::normalize_for_comparison;

/// Compare a canonical measured value against an expectation.
///
/// The expected value is converted from its declared unit before the comparison. The returned
/// result records the expected value as declared and the measured value as given.
pub fn evaluate(
    expectation: &Expectation,
    measured: f64,
    scenario_id: &ScenarioId,
    run_id: &RunId,
) -> ExpectationResult {
    let (measured_canonical, expected_canonical) = normalize_for_comparison(
        measured,
        expectation.value,
        &expectation.unit,
        &expectation.metric,
    );
    let passed = expectation
        .operator
        .compare(measured_canonical, expected_canonical);

    ExpectationResult {
        scenario_id: scenario_id.clone(),
        run_id: run_id.clone(),
        metric_name: expectation.metric.clone(),
        expected_value: expectation.expected_text(),
        measured_value: measured.to_string(),
        status: Verdict::from_outcome(passed),
        scope: expectation.evaluation_scope,
    }
}

/// Renders verdicts for expectations and writes them to the result log.
#[derive(Clone)]
pub struct ExpectationEvaluator {
    store: Arc<dyn MetricStore>,
    aggregator: MetricsAggregator,
}

impl ExpectationEvaluator {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self {
            aggregator: MetricsAggregator::new(store.clone()),
            store,
        }
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    /// Evaluate the per-iteration expectations against the averages of one run.
    ///
    /// A metric the run did not record is measured as `0`.
    pub fn evaluate_run(
        &self,
        scenario_id: &ScenarioId,
        run_id: &RunId,
        expectations: &[Expectation],
    ) -> StoreResult<Vec<ExpectationResult>> {
        let averages = self.aggregator.run_averages(run_id)?;

        self.record(
            expectations,
            EvaluationScope::PerIteration,
            |expectation| {
                let measured = averages.get(&expectation.metric).copied().unwrap_or(0.0);
                evaluate(expectation, measured, scenario_id, run_id)
            },
        )
    }

    /// Evaluate the scenario expectations against statistics over every run of the scenario.
    ///
    /// Results are attached to any run of the scenario. If the scenario never ran, a fresh
    /// placeholder run id is used.
    pub fn evaluate_scenario(
        &self,
        scenario_id: &ScenarioId,
        expectations: &[Expectation],
    ) -> StoreResult<Vec<ExpectationResult>> {
        if !expectations
            .iter()
            .any(|e| e.evaluation_scope == EvaluationScope::Scenario)
        {
            return Ok(Vec::new());
        }

        let statistics = self.aggregator.scenario_statistics(scenario_id)?;
        let run_id = match self.store.find_any_run_id(scenario_id)? {
            Some(run_id) => run_id,
            None => {
                let placeholder = RunId::generate();
                log::debug!(
                    "Scenario {} has no runs, recording results against placeholder run {}",
                    scenario_id,
                    placeholder
                );
                placeholder
            }
        };

        self.record(expectations, EvaluationScope::Scenario, |expectation| {
            let measured = select_from(&statistics, &expectation.metric, expectation.aggregation);
            evaluate(expectation, measured, scenario_id, &run_id)
        })
    }

    fn record(
        &self,
        expectations: &[Expectation],
        scope: EvaluationScope,
        evaluate: impl Fn(&Expectation) -> ExpectationResult,
    ) -> StoreResult<Vec<ExpectationResult>> {
        let mut results = Vec::new();
        for expectation in expectations.iter().filter(|e| e.evaluation_scope == scope) {
            let result = evaluate(expectation);
            log::debug!(
                "{} {} {} {}: measured {} -> {}",
                result.scope,
                expectation.metric,
                expectation.operator.as_str(),
                result.expected_value,
                result.measured_value,
                result.status
            );
            self.store.insert_result_log(&result)?;
            results.push(result);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use load_test_model::{Aggregation, Operator, TestRun};
    use load_test_store::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn expectation(
        metric: &str,
        operator: Operator,
        value: f64,
        unit: &str,
        scope: EvaluationScope,
        aggregation: Aggregation,
    ) -> Expectation {
        Expectation {
            metric: metric.to_string(),
            operator,
            value,
            unit: unit.to_string(),
            evaluation_scope: scope,
            aggregation,
        }
    }

    fn add_run(store: &InMemoryStore, run_id: &str, scenario_id: &str, samples: &[(&str, f64)]) {
        store
            .insert_test_run(&TestRun {
                run_id: RunId::from(run_id),
                scenario_id: ScenarioId::from(scenario_id),
                start_time: Utc::now(),
                worker_node: "test".to_string(),
            })
            .unwrap();
        for (name, value) in samples {
            store
                .insert_raw_metrics_batch(&RunId::from(run_id), &[(name.to_string(), *value)])
                .unwrap();
        }
    }

    #[test]
    fn per_iteration_latency_within_threshold() {
        let store = Arc::new(InMemoryStore::new());
        add_run(
            &store,
            "r1",
            "s1",
            &[("latency", 10.0), ("latency", 12.0), ("latency", 14.0)],
        );
        let evaluator = ExpectationEvaluator::new(store.clone());

        let results = evaluator
            .evaluate_run(
                &ScenarioId::from("s1"),
                &RunId::from("r1"),
                &[expectation(
                    "latency",
                    Operator::Lte,
                    20.0,
                    "ms",
                    EvaluationScope::PerIteration,
                    Aggregation::Avg,
                )],
            )
            .unwrap();

        assert_eq!(
            vec![ExpectationResult {
                scenario_id: ScenarioId::from("s1"),
                run_id: RunId::from("r1"),
                metric_name: "latency".to_string(),
                expected_value: "20 ms".to_string(),
                measured_value: "12".to_string(),
                status: Verdict::Pass,
                scope: EvaluationScope::PerIteration,
            }],
            results
        );
        assert_eq!(results, store.result_logs(&ScenarioId::from("s1")).unwrap());
    }

    #[test]
    fn expected_unit_is_normalized() {
        let store = Arc::new(InMemoryStore::new());
        add_run(&store, "r1", "s1", &[("latency", 1500.0)]);
        let evaluator = ExpectationEvaluator::new(store);

        let results = evaluator
            .evaluate_run(
                &ScenarioId::from("s1"),
                &RunId::from("r1"),
                &[expectation(
                    "latency",
                    Operator::Lt,
                    1.0,
                    "s",
                    EvaluationScope::PerIteration,
                    Aggregation::Avg,
                )],
            )
            .unwrap();

        assert_eq!(Verdict::Fail, results[0].status);
        assert_eq!("1 s", results[0].expected_value);
        assert_eq!("1500", results[0].measured_value);
    }

    #[test]
    fn missing_metric_is_measured_as_zero() {
        let store = Arc::new(InMemoryStore::new());
        add_run(&store, "r1", "s1", &[("latency", 10.0)]);
        let evaluator = ExpectationEvaluator::new(store);

        let results = evaluator
            .evaluate_run(
                &ScenarioId::from("s1"),
                &RunId::from("r1"),
                &[
                    expectation(
                        "download_speed",
                        Operator::Gte,
                        50.0,
                        "mbps",
                        EvaluationScope::PerIteration,
                        Aggregation::Avg,
                    ),
                    expectation(
                        "upload_speed",
                        Operator::Gt,
                        0.5,
                        "",
                        EvaluationScope::PerIteration,
                        Aggregation::Avg,
                    ),
                ],
            )
            .unwrap();

        assert_eq!(2, results.len());
        for result in results {
            assert_eq!("0", result.measured_value);
            assert_eq!(Verdict::Fail, result.status);
        }
    }

    #[test]
    fn only_matching_scope_is_evaluated() {
        let store = Arc::new(InMemoryStore::new());
        add_run(&store, "r1", "s1", &[("latency", 10.0)]);
        let evaluator = ExpectationEvaluator::new(store.clone());
        let expectations = [
            expectation(
                "latency",
                Operator::Lte,
                20.0,
                "ms",
                EvaluationScope::PerIteration,
                Aggregation::Avg,
            ),
            expectation(
                "latency",
                Operator::Lte,
                20.0,
                "ms",
                EvaluationScope::Scenario,
                Aggregation::Max,
            ),
        ];

        let per_run = evaluator
            .evaluate_run(&ScenarioId::from("s1"), &RunId::from("r1"), &expectations)
            .unwrap();
        let scenario = evaluator
            .evaluate_scenario(&ScenarioId::from("s1"), &expectations)
            .unwrap();

        assert_eq!(1, per_run.len());
        assert_eq!(EvaluationScope::PerIteration, per_run[0].scope);
        assert_eq!(1, scenario.len());
        assert_eq!(EvaluationScope::Scenario, scenario[0].scope);
        assert_eq!(2, store.result_logs(&ScenarioId::from("s1")).unwrap().len());
    }

    #[test]
    fn scenario_p99_download_speed_passes() {
        let store = Arc::new(InMemoryStore::new());
        add_run(
            &store,
            "r1",
            "s1",
            &[("download_speed", 100.0), ("download_speed", 120.0)],
        );
        add_run(
            &store,
            "r2",
            "s1",
            &[("download_speed", 110.0), ("download_speed", 200.0)],
        );
        let evaluator = ExpectationEvaluator::new(store);

        let results = evaluator
            .evaluate_scenario(
                &ScenarioId::from("s1"),
                &[expectation(
                    "download_speed",
                    Operator::Gte,
                    100.0,
                    "mbps",
                    EvaluationScope::Scenario,
                    Aggregation::P99,
                )],
            )
            .unwrap();

        assert_eq!(1, results.len());
        assert_eq!(Verdict::Pass, results[0].status);
        assert_eq!("100 mbps", results[0].expected_value);
        let measured: f64 = results[0].measured_value.parse().unwrap();
        assert!((measured - 197.6).abs() < 1e-9);
        assert!(["r1", "r2"].contains(&results[0].run_id.as_str()));
    }

    #[test]
    fn scenario_without_runs_uses_placeholder_run() {
        let store = Arc::new(InMemoryStore::new());
        let evaluator = ExpectationEvaluator::new(store.clone());

        let results = evaluator
            .evaluate_scenario(
                &ScenarioId::from("s1"),
                &[expectation(
                    "latency",
                    Operator::Lte,
                    20.0,
                    "ms",
                    EvaluationScope::Scenario,
                    Aggregation::Avg,
                )],
            )
            .unwrap();

        assert_eq!(1, results.len());
        assert_eq!("0", results[0].measured_value);
        // 0 <= 20 holds even though nothing was measured.
        assert_eq!(Verdict::Pass, results[0].status);
        assert_eq!(None, store.find_any_run_id(&ScenarioId::from("s1")).unwrap());
    }

    #[test]
    fn eq_with_computed_average_fails() {
        let store = Arc::new(InMemoryStore::new());
        add_run(&store, "r1", "s1", &[("resource_count", 0.1), ("resource_count", 0.2)]);
        let evaluator = ExpectationEvaluator::new(store);

        let results = evaluator
            .evaluate_run(
                &ScenarioId::from("s1"),
                &RunId::from("r1"),
                &[expectation(
                    "resource_count",
                    Operator::Eq,
                    0.15,
                    "",
                    EvaluationScope::PerIteration,
                    Aggregation::Avg,
                )],
            )
            .unwrap();

        // (0.1 + 0.2) / 2 is 0.15000000000000002 in binary floating point.
        assert_eq!(Verdict::Fail, results[0].status);
    }

    #[test]
    fn unrecognized_operator_fails() {
        let result = evaluate(
            &expectation(
                "latency",
                Operator::Unrecognized("approx".to_string()),
                10.0,
                "ms",
                EvaluationScope::PerIteration,
                Aggregation::Avg,
            ),
            10.0,
            &ScenarioId::from("s1"),
            &RunId::from("r1"),
        );

        assert_eq!(Verdict::Fail, result.status);
    }
}
