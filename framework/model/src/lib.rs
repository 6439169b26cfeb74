mod expectation;
mod record;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::Path;

pub use expectation::{Aggregation, EvaluationScope, Expectation, Operator, Verdict};
pub use record::{
    ExpectationResult, MetricStatistics, RawMetricRow, ScenarioSummary, TestRun,
};

/// Append records to a file
///
/// Each record will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_records<T: Serialize>(records: &[T], path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    for record in records {
        serde_json::to_writer(&mut file, record)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Load records from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_records]. Blank lines are skipped.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use load_test_core::prelude::ScenarioId;
    use pretty_assertions::assert_eq;

    #[test]
    fn appended_summaries_can_be_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario_summary.jsonl");

        let summary = ScenarioSummary {
            scenario_id: ScenarioId::from("s1"),
            metric_name: "latency".to_string(),
            statistics: MetricStatistics {
                sample_count: 3,
                avg: 12.0,
                min: 10.0,
                max: 14.0,
                p50: 12.0,
                p99: 13.96,
                stddev: 2.0,
            },
            computed_at: Utc::now(),
        };

        append_records(&[summary.clone()], &path).unwrap();
        append_records(&[summary.clone()], &path).unwrap();

        let loaded: Vec<ScenarioSummary> = load_records(&path).unwrap();
        assert_eq!(vec![summary.clone(), summary], loaded);
    }
}
