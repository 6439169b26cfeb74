mod summary_table;
mod verdict_table;

use load_test_core::prelude::ScenarioId;
use load_test_model::{ExpectationResult, ScenarioSummary, Verdict};
use tabled::settings::Style;
use tabled::Table;

pub use summary_table::SummaryRow;
pub use verdict_table::VerdictRow;

/// Render the metric summaries of a scenario as a table.
pub fn summary_table(summaries: &[ScenarioSummary]) -> String {
    let rows = summaries.iter().map(SummaryRow::from).collect::<Vec<_>>();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.to_string()
}

/// Render expectation results as a table, in the order they were recorded.
pub fn verdict_table(results: &[ExpectationResult]) -> String {
    let rows = results.iter().map(VerdictRow::from).collect::<Vec<_>>();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.to_string()
}

/// Print everything that was measured and decided for a scenario.
pub fn print_scenario_report(
    scenario_id: &ScenarioId,
    name: &str,
    summaries: &[ScenarioSummary],
    results: &[ExpectationResult],
) {
    println!("\nScenario {} ({})", name, scenario_id);

    if summaries.is_empty() {
        println!("No metrics were recorded");
    } else {
        println!("{}", summary_table(summaries));
    }

    if !results.is_empty() {
        let failed = results
            .iter()
            .filter(|r| r.status == Verdict::Fail)
            .count();
        println!(
            "Expectations: {} passed, {} failed",
            results.len() - failed,
            failed
        );
        println!("{}", verdict_table(results));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use load_test_core::prelude::RunId;
    use load_test_model::{EvaluationScope, MetricStatistics};

    #[test]
    fn summary_table_shows_canonical_unit_and_rounded_values() {
        let table = summary_table(&[ScenarioSummary {
            scenario_id: ScenarioId::from("s1"),
            metric_name: "download_speed".to_string(),
            statistics: MetricStatistics {
                sample_count: 4,
                avg: 132.5,
                min: 100.0,
                max: 200.0,
                p50: 115.0,
                p99: 197.6,
                stddev: 45.73,
            },
            computed_at: Utc::now(),
        }]);

        assert!(table.contains("download_speed"), "{table}");
        assert!(table.contains("mbps"), "{table}");
        assert!(table.contains("197.60"), "{table}");
        assert!(table.contains("p99"), "{table}");
    }

    #[test]
    fn verdict_table_lists_every_result() {
        let results = ["latency", "jitter"]
            .into_iter()
            .map(|metric| ExpectationResult {
                scenario_id: ScenarioId::from("s1"),
                run_id: RunId::from("r1"),
                metric_name: metric.to_string(),
                expected_value: "20 ms".to_string(),
                measured_value: "12".to_string(),
                status: Verdict::Pass,
                scope: EvaluationScope::PerIteration,
            })
            .collect::<Vec<_>>();

        let table = verdict_table(&results);
        assert!(table.contains("latency"), "{table}");
        assert!(table.contains("jitter"), "{table}");
        assert!(table.contains("per_iteration"), "{table}");
        assert_eq!(2, table.matches("PASS").count(), "{table}");
    }
}
