use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use load_test_core::prelude::{RunId, ScenarioId};
use load_test_model::{
    EvaluationScope, ExpectationResult, MetricStatistics, RawMetricRow, ScenarioSummary, TestRun,
    Verdict,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{validate_batch, MetricStore, StoreError, StoreResult};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A [MetricStore] backed by a SQLite database.
///
/// A single connection is shared behind a mutex, so concurrent firings serialize their writes.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open, or create, the database at `path` and make sure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        log::debug!("Opened SQLite store at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl MetricStore for SqliteStore {
    fn insert_scenario(
        &self,
        scenario_id: &ScenarioId,
        protocol: &str,
        config_snapshot: &serde_json::Value,
    ) -> StoreResult<()> {
        let snapshot = serde_json::to_string(config_snapshot)?;
        self.conn.lock().execute(
            "INSERT INTO scenarios (scenario_id, protocol, config_snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (scenario_id) DO UPDATE SET config_snapshot = excluded.config_snapshot",
            params![
                scenario_id.as_str(),
                protocol,
                snapshot,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn insert_test_run(&self, run: &TestRun) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO test_runs (run_id, scenario_id, start_time, worker_node)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run.run_id.as_str(),
                run.scenario_id.as_str(),
                run.start_time.to_rfc3339(),
                run.worker_node
            ],
        )?;
        Ok(())
    }

    fn insert_raw_metrics_batch(
        &self,
        run_id: &RunId,
        metrics: &[(String, f64)],
    ) -> StoreResult<()> {
        validate_batch(metrics)?;

        let mut conn = self.conn.lock();
        let exists = conn
            .query_row(
                "SELECT 1 FROM test_runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownRun(run_id.clone()));
        }

        let timestamp = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO raw_metrics (id, run_id, metric_name, metric_value, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (metric_name, value) in metrics {
                stmt.execute(params![
                    nanoid::nanoid!(),
                    run_id.as_str(),
                    metric_name,
                    value.to_string(),
                    timestamp
                ])?;
            }
        }
        // Dropping the transaction without committing rolls back, so an error above leaves no
        // partial batch behind.
        tx.commit()?;
        Ok(())
    }

    fn insert_result_log(&self, result: &ExpectationResult) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO results_log
                (id, scenario_id, run_id, metric_name, expected_value, measured_value, status, scope)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                nanoid::nanoid!(),
                result.scenario_id.as_str(),
                result.run_id.as_str(),
                result.metric_name,
                result.expected_value,
                result.measured_value,
                result.status.as_str(),
                result.scope.as_str()
            ],
        )?;
        Ok(())
    }

    fn raw_metrics_for_run(&self, run_id: &RunId) -> StoreResult<Vec<RawMetricRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT metric_name, metric_value, timestamp
             FROM raw_metrics
             WHERE run_id = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<(String, String, String)>, _>>()?;

        rows.into_iter().map(raw_metric_row).collect()
    }

    fn raw_metrics_for_scenario(
        &self,
        scenario_id: &ScenarioId,
    ) -> StoreResult<Vec<RawMetricRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT rm.metric_name, rm.metric_value, rm.timestamp
             FROM raw_metrics rm
             JOIN test_runs tr ON rm.run_id = tr.run_id
             WHERE tr.scenario_id = ?1
             ORDER BY rm.rowid",
        )?;
        let rows = stmt
            .query_map(params![scenario_id.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<(String, String, String)>, _>>()?;

        rows.into_iter().map(raw_metric_row).collect()
    }

    fn upsert_scenario_summary(&self, summary: &ScenarioSummary) -> StoreResult<()> {
        let stats = &summary.statistics;
        let sample_count = i64::try_from(stats.sample_count).map_err(|_| {
            StoreError::InvalidRecord(format!("sample count {} too large", stats.sample_count))
        })?;

        self.conn.lock().execute(
            "INSERT INTO scenario_summary
                (id, scenario_id, metric_name, sample_count, avg_value, min_value, max_value,
                 p50_value, p99_value, stddev_value, aggregated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (scenario_id, metric_name) DO UPDATE SET
                sample_count = excluded.sample_count,
                avg_value = excluded.avg_value,
                min_value = excluded.min_value,
                max_value = excluded.max_value,
                p50_value = excluded.p50_value,
                p99_value = excluded.p99_value,
                stddev_value = excluded.stddev_value,
                aggregated_at = excluded.aggregated_at",
            params![
                nanoid::nanoid!(),
                summary.scenario_id.as_str(),
                summary.metric_name,
                sample_count,
                stats.avg,
                stats.min,
                stats.max,
                stats.p50,
                stats.p99,
                stats.stddev,
                summary.computed_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn find_any_run_id(&self, scenario_id: &ScenarioId) -> StoreResult<Option<RunId>> {
        let run_id = self
            .conn
            .lock()
            .query_row(
                "SELECT run_id FROM test_runs WHERE scenario_id = ?1 LIMIT 1",
                params![scenario_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(run_id.map(RunId::from))
    }

    fn test_runs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<TestRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, start_time, worker_node
             FROM test_runs
             WHERE scenario_id = ?1
             ORDER BY start_time, rowid",
        )?;
        let rows = stmt
            .query_map(params![scenario_id.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<(String, String, String)>, _>>()?;

        rows.into_iter()
            .map(|(run_id, start_time, worker_node)| {
                Ok(TestRun {
                    run_id: RunId::from(run_id),
                    scenario_id: scenario_id.clone(),
                    start_time: parse_timestamp("test_runs", &start_time)?,
                    worker_node,
                })
            })
            .collect()
    }

    fn result_logs(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ExpectationResult>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, metric_name, expected_value, measured_value, status, scope
             FROM results_log
             WHERE scenario_id = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![scenario_id.as_str()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<(String, String, String, String, String, String)>, _>>()?;

        rows.into_iter()
            .map(
                |(run_id, metric_name, expected_value, measured_value, status, scope)| {
                    Ok(ExpectationResult {
                        scenario_id: scenario_id.clone(),
                        run_id: RunId::from(run_id),
                        metric_name,
                        expected_value,
                        measured_value,
                        status: parse_verdict(&status)?,
                        scope: parse_scope(&scope)?,
                    })
                },
            )
            .collect()
    }

    fn scenario_summaries(&self, scenario_id: &ScenarioId) -> StoreResult<Vec<ScenarioSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT metric_name, sample_count, avg_value, min_value, max_value,
                    p50_value, p99_value, stddev_value, aggregated_at
             FROM scenario_summary
             WHERE scenario_id = ?1
             ORDER BY metric_name",
        )?;
        let rows = stmt
            .query_map(params![scenario_id.as_str()], |row| {
                Ok(SummaryRow {
                    metric_name: row.get(0)?,
                    sample_count: row.get(1)?,
                    avg: row.get(2)?,
                    min: row.get(3)?,
                    max: row.get(4)?,
                    p50: row.get(5)?,
                    p99: row.get(6)?,
                    stddev: row.get(7)?,
                    aggregated_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let sample_count = usize::try_from(row.sample_count).map_err(|_| {
                    StoreError::Corrupt {
                        table: "scenario_summary",
                        detail: format!("negative sample count {}", row.sample_count),
                    }
                })?;

                Ok(ScenarioSummary {
                    scenario_id: scenario_id.clone(),
                    metric_name: row.metric_name,
                    statistics: MetricStatistics {
                        sample_count,
                        avg: row.avg,
                        min: row.min,
                        max: row.max,
                        p50: row.p50,
                        p99: row.p99,
                        stddev: row.stddev,
                    },
                    computed_at: parse_timestamp("scenario_summary", &row.aggregated_at)?,
                })
            })
            .collect()
    }
}

struct SummaryRow {
    metric_name: String,
    sample_count: i64,
    avg: f64,
    min: f64,
    max: f64,
    p50: f64,
    p99: f64,
    stddev: f64,
    aggregated_at: String,
}

fn raw_metric_row(
    (metric_name, metric_value, timestamp): (String, String, String),
) -> StoreResult<RawMetricRow> {
    Ok(RawMetricRow {
        metric_name,
        metric_value,
        timestamp: parse_timestamp("raw_metrics", &timestamp)?,
    })
}

fn parse_timestamp(table: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            detail: format!("invalid timestamp {value:?}: {e}"),
        })
}

fn parse_verdict(value: &str) -> StoreResult<Verdict> {
    match value {
        "PASS" => Ok(Verdict::Pass),
        "FAIL" => Ok(Verdict::Fail),
        other => Err(StoreError::Corrupt {
            table: "results_log",
            detail: format!("unknown status {other:?}"),
        }),
    }
}

fn parse_scope(value: &str) -> StoreResult<EvaluationScope> {
    match value {
        "per_iteration" => Ok(EvaluationScope::PerIteration),
        "scenario" => Ok(EvaluationScope::Scenario),
        other => Err(StoreError::Corrupt {
            table: "results_log",
            detail: format!("unknown scope {other:?}"),
        }),
    }
}
