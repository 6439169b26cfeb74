use chrono::{DateTime, Utc};
use load_test_core::prelude::{RunId, ScenarioId};
use serde::{Deserialize, Serialize};

use crate::expectation::{Aggregation, EvaluationScope, Verdict};

/// The record of one firing of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRun {
    pub run_id: RunId,
    pub scenario_id: ScenarioId,
    pub start_time: DateTime<Utc>,
    /// Host name of the worker that executed the firing.
    pub worker_node: String,
}

/// A raw metric sample as it is read back from a store.
///
/// The value is kept as text, the way it was persisted. Aggregation parses it and drops anything
/// that is not a finite number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMetricRow {
    pub metric_name: String,
    pub metric_value: String,
    pub timestamp: DateTime<Utc>,
}

impl RawMetricRow {
    pub fn parsed_value(&self) -> Option<f64> {
        self.metric_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }
}

/// One row of the audit trail produced by evaluating an expectation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpectationResult {
    /// The scenario the evaluated expectation belongs to.
    pub scenario_id: ScenarioId,
    /// A run of the scenario. For scenario scope results this may be a placeholder if the scenario
    /// never ran.
    pub run_id: RunId,
    pub metric_name: String,
    /// The expected value with its declared unit, before normalization.
    pub expected_value: String,
    /// The measured value, always in the canonical unit of the metric.
    pub measured_value: String,
    pub status: Verdict,
    pub scope: EvaluationScope,
}

/// Statistics for one metric across every sample of a scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct MetricStatistics {
    pub sample_count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p99: f64,
    /// Sample standard deviation, 0 when there are fewer than two samples.
    pub stddev: f64,
}

impl MetricStatistics {
    /// Look up one named aggregate.
    pub fn select(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Avg => self.avg,
            Aggregation::Min => self.min,
            Aggregation::Max => self.max,
            Aggregation::P50 => self.p50,
            Aggregation::P99 => self.p99,
            Aggregation::Stddev => self.stddev,
        }
    }
}

/// Persisted statistical rollup of one metric across all runs of a scenario.
///
/// There is at most one summary per `(scenario_id, metric_name)`, recomputing replaces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummary {
    pub scenario_id: ScenarioId,
    pub metric_name: String,
    #[serde(flatten)]
    pub statistics: MetricStatistics,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: &str) -> RawMetricRow {
        RawMetricRow {
            metric_name: "latency".to_string(),
            metric_value: value.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn parse_numeric_text() {
        assert_eq!(Some(12.5), row("12.5").parsed_value());
        assert_eq!(Some(3.0), row(" 3 ").parsed_value());
    }

    #[test]
    fn select_named_aggregate() {
        let stats = MetricStatistics {
            sample_count: 2,
            avg: 1.0,
            min: 2.0,
            max: 3.0,
            p50: 4.0,
            p99: 5.0,
            stddev: 6.0,
        };

        assert_eq!(1.0, stats.select(Aggregation::Avg));
        assert_eq!(2.0, stats.select(Aggregation::Min));
        assert_eq!(3.0, stats.select(Aggregation::Max));
        assert_eq!(4.0, stats.select(Aggregation::P50));
        assert_eq!(5.0, stats.select(Aggregation::P99));
        assert_eq!(6.0, stats.select(Aggregation::Stddev));
    }

    #[test]
    fn drop_unparseable_or_non_finite_values() {
        assert_eq!(None, row("fast").parsed_value());
        assert_eq!(None, row("").parsed_value());
        assert_eq!(None, row("NaN").parsed_value());
        assert_eq!(None, row("inf").parsed_value());
    }
}
