use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;
use load_test_core::prelude::{RunId, ScenarioId};
use load_test_model::{Aggregation, MetricStatistics, RawMetricRow, ScenarioSummary};
use load_test_store::{MetricStore, StoreResult};

/// Linear interpolation percentile over values that are already sorted ascending.
///
/// `fraction` is in `[0, 1]`, so the median is `0.5`. An empty slice gives `0.0`.
pub fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }

    let index = (n - 1) as f64 * fraction;
    let lower = index.floor() as usize;
    let upper = lower + 1;
    if upper >= n {
        return sorted[n - 1];
    }

    let weight = index - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation, defined as 0 for fewer than two values.
pub fn standard_deviation(values: &[f64]) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    variance.sqrt()
}

/// Compute every statistic for a set of samples, or `None` if there are no samples.
pub fn statistics(values: &[f64]) -> Option<MetricStatistics> {
    let avg = mean(values)?;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(MetricStatistics {
        sample_count: sorted.len(),
        avg,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p50: percentile(&sorted, 0.5),
        p99: percentile(&sorted, 0.99),
        stddev: standard_deviation(&sorted),
    })
}

/// Group the parseable samples by metric name. Samples whose value does not parse are dropped.
fn group_by_metric(rows: Vec<RawMetricRow>) -> BTreeMap<String, Vec<f64>> {
    let dropped = rows.iter().filter(|r| r.parsed_value().is_none()).count();
    if dropped > 0 {
        log::debug!("Dropping {} raw metric samples with non-numeric values", dropped);
    }

    rows.into_iter()
        .filter_map(|row| {
            let value = row.parsed_value()?;
            Some((row.metric_name, value))
        })
        .into_group_map()
        .into_iter()
        .collect()
}

/// Reduces raw samples from a [MetricStore] into run averages and scenario statistics.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn MetricStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// The mean of each metric recorded for the run.
    ///
    /// Metrics without a single valid sample are absent from the result.
    pub fn run_averages(&self, run_id: &RunId) -> StoreResult<BTreeMap<String, f64>> {
        let rows = self.store.raw_metrics_for_run(run_id)?;

        Ok(group_by_metric(rows)
            .into_iter()
            .filter_map(|(metric, values)| Some((metric, mean(&values)?)))
            .collect())
    }

    /// Statistics for each metric over every sample of every run of the scenario.
    pub fn scenario_statistics(
        &self,
        scenario_id: &ScenarioId,
    ) -> StoreResult<BTreeMap<String, MetricStatistics>> {
        let rows = self.store.raw_metrics_for_scenario(scenario_id)?;

        Ok(group_by_metric(rows)
            .into_iter()
            .filter_map(|(metric, values)| Some((metric, statistics(&values)?)))
            .collect())
    }

    /// One named aggregate of a metric over the scenario, `0.0` if the metric was never recorded.
    pub fn select_aggregate(
        &self,
        scenario_id: &ScenarioId,
        metric_name: &str,
        aggregation: Aggregation,
    ) -> StoreResult<f64> {
        let statistics = self.scenario_statistics(scenario_id)?;
        Ok(select_from(&statistics, metric_name, aggregation))
    }

    /// Recompute the scenario statistics and upsert one summary per metric.
    ///
    /// Returns the summaries that were written.
    pub fn persist_summary(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ScenarioSummary>> {
        let computed_at = Utc::now();
        let summaries = self
            .scenario_statistics(scenario_id)?
            .into_iter()
            .map(|(metric_name, statistics)| ScenarioSummary {
                scenario_id: scenario_id.clone(),
                metric_name,
                statistics,
                computed_at,
            })
            .collect::<Vec<_>>();

        for summary in &summaries {
            self.store.upsert_scenario_summary(summary)?;
        }

        log::debug!(
            "Persisted {} metric summaries for scenario {}",
            summaries.len(),
            scenario_id
        );

        Ok(summaries)
    }
}

/// Select an aggregate from precomputed scenario statistics.
pub(crate) fn select_from(
    statistics: &BTreeMap<String, MetricStatistics>,
    metric_name: &str,
    aggregation: Aggregation,
) -> f64 {
    statistics
        .get(metric_name)
        .map(|s| s.select(aggregation))
        .unwrap_or(0.0)
}
