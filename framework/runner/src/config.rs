use std::path::{Path, PathBuf};

use load_test_model::Expectation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::handler::Parameters;
use crate::schedule::{Schedule, ScheduleConfig, ScheduleError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The top level of a load test configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadTestConfig {
    #[serde(default)]
    pub global_settings: GlobalSettings,
    /// Entries that fail to parse are logged and left out.
    #[serde(default, deserialize_with = "lenient_scenarios")]
    pub scenarios: Vec<ScenarioConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Directory that summaries and verdicts are written to at the end of a run.
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    /// SQLite database for everything recorded during the run. Kept in memory if not set.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// How long to wait for in-flight firings after the longest scenario window has ended.
    #[serde(default = "default_completion_buffer_minutes")]
    pub completion_buffer_minutes: f64,
}

fn default_report_path() -> PathBuf {
    PathBuf::from("./results/")
}

fn default_completion_buffer_minutes() -> f64 {
    5.0
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            report_path: default_report_path(),
            database_path: None,
            completion_buffer_minutes: default_completion_buffer_minutes(),
        }
    }
}

/// A schedulable test definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Human readable name of the scenario. Each run of the configuration assigns the scenario a
    /// fresh [load_test_core::prelude::ScenarioId].
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    /// Name of the protocol handler that runs the test.
    pub protocol: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Expectations that fail to parse are logged and left out, the scenario still runs.
    #[serde(default, deserialize_with = "lenient_expectations")]
    pub expectations: Vec<Expectation>,
}

impl ScenarioConfig {
    pub fn schedule(&self) -> Result<Schedule, ScheduleError> {
        Schedule::try_from(&self.schedule)
    }
}

impl LoadTestConfig {
    /// Read a configuration file.
    ///
    /// Only unreadable files and invalid JSON fail the load. Schedules are checked when each
    /// scenario is scheduled, so one bad scenario does not stop the others.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn enabled_scenarios(&self) -> impl Iterator<Item = &ScenarioConfig> {
        self.scenarios.iter().filter(|s| s.enabled)
    }
}

fn skip_invalid<'de, D, T>(deserializer: D, kind: &str) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = Vec::<serde_json::Value>::deserialize(deserializer)?;

    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("Ignoring invalid {} at index {}: {}", kind, index, e);
                None
            }
        })
        .collect())
}

fn lenient_scenarios<'de, D>(deserializer: D) -> Result<Vec<ScenarioConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    skip_invalid(deserializer, "scenario")
}

fn lenient_expectations<'de, D>(deserializer: D) -> Result<Vec<Expectation>, D::Error>
where
    D: Deserializer<'de>,
{
    skip_invalid(deserializer, "expectation")
}

#[cfg(test)]
mod tests {
    use super::*;
    use load_test_model::{Aggregation, EvaluationScope, Operator};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_full_configuration() {
        let file = write_config(
            r#"{
                "global_settings": { "report_path": "./out/", "database_path": "./out/db.sqlite" },
                "scenarios": [
                    {
                        "id": "speed-eu",
                        "enabled": true,
                        "protocol": "speed_test",
                        "parameters": { "target_url": ["10.0.0.5:5201"], "duration": 10 },
                        "schedule": { "mode": "recurring", "interval_minutes": 5, "duration_hours": 0.5 },
                        "expectations": [
                            { "metric": "download_speed", "operator": "gte", "value": 100, "unit": "mbps",
                              "evaluation_scope": "scenario", "aggregation": "p99" }
                        ]
                    },
                    { "id": "disabled", "protocol": "web_browsing" }
                ]
            }"#,
        );

        let config = LoadTestConfig::load(file.path()).unwrap();

        assert_eq!(PathBuf::from("./out/"), config.global_settings.report_path);
        assert_eq!(
            Some(PathBuf::from("./out/db.sqlite")),
            config.global_settings.database_path
        );
        assert_eq!(5.0, config.global_settings.completion_buffer_minutes);

        let enabled = config.enabled_scenarios().collect::<Vec<_>>();
        assert_eq!(1, enabled.len());
        let scenario = enabled[0];
        assert_eq!("speed_test", scenario.protocol);
        assert_eq!("immediate", scenario.schedule.start_time);
        assert!(matches!(
            scenario.schedule().unwrap(),
            Schedule::Recurring { .. }
        ));
        assert_eq!(Operator::Gte, scenario.expectations[0].operator);
        assert_eq!(Aggregation::P99, scenario.expectations[0].aggregation);
        assert_eq!(
            EvaluationScope::Scenario,
            scenario.expectations[0].evaluation_scope
        );

        assert!(!config.scenarios[1].enabled);
        assert_eq!("once", config.scenarios[1].schedule.mode);
    }

    #[test]
    fn missing_file() {
        let result = LoadTestConfig::load(Path::new("/does/not/exist.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn malformed_json() {
        let file = write_config("{ \"scenarios\": [ ");
        assert!(matches!(
            LoadTestConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn unknown_evaluation_scope_drops_only_that_expectation() {
        let file = write_config(
            r#"{ "scenarios": [ { "id": "s", "enabled": true, "protocol": "p", "expectations": [
                { "metric": "latency", "operator": "lte", "value": 1, "evaluation_scope": "weekly" },
                { "metric": "jitter", "operator": "lte", "value": 5, "evaluation_scope": "per_iteration" }
            ] } ] }"#,
        );

        let config = LoadTestConfig::load(file.path()).unwrap();

        assert_eq!(1, config.scenarios.len());
        let expectations = &config.scenarios[0].expectations;
        assert_eq!(1, expectations.len());
        assert_eq!("jitter", expectations[0].metric);
    }

    #[test]
    fn invalid_schedule_does_not_fail_the_load() {
        let file = write_config(
            r#"{ "scenarios": [
                { "id": "bad", "enabled": true, "protocol": "p", "schedule": { "mode": "sometimes" } },
                { "id": "good", "enabled": true, "protocol": "p", "schedule": { "mode": "once" } }
            ] }"#,
        );

        let config = LoadTestConfig::load(file.path()).unwrap();

        let enabled = config.enabled_scenarios().collect::<Vec<_>>();
        assert_eq!(2, enabled.len());
        assert!(matches!(
            enabled[0].schedule(),
            Err(ScheduleError::UnknownMode(_))
        ));
        assert!(matches!(enabled[1].schedule(), Ok(Schedule::Once { .. })));
    }

    #[test]
    fn malformed_scenario_is_skipped() {
        let file = write_config(
            r#"{ "scenarios": [
                { "id": "no-protocol", "enabled": true },
                { "id": "good", "enabled": true, "protocol": "p" }
            ] }"#,
        );

        let config = LoadTestConfig::load(file.path()).unwrap();

        assert_eq!(
            vec!["good"],
            config.scenarios.iter().map(|s| s.id.as_str()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn unknown_operator_is_accepted() {
        let file = write_config(
            r#"{ "scenarios": [ { "id": "s", "enabled": true, "protocol": "p", "expectations": [
                { "metric": "latency", "operator": "approx", "value": 1, "evaluation_scope": "per_iteration" }
            ] } ] }"#,
        );

        let config = LoadTestConfig::load(file.path()).unwrap();
        assert_eq!(
            Operator::Unrecognized("approx".to_string()),
            config.scenarios[0].expectations[0].operator
        );
    }
}
