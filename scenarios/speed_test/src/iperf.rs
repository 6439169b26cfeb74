use std::fmt::{Display, Formatter};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::Context;
use load_test_runner::prelude::ResultRecord;
use serde_json::Value;

pub(crate) const DEFAULT_PORT: u16 = 5201;

/// Extra time iperf3 gets on top of the test duration before it is killed.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Parse `host:port`, the port defaults to [DEFAULT_PORT].
    pub(crate) fn parse(url: &str) -> anyhow::Result<Self> {
        match url.rsplit_once(':') {
            Some((host, port)) => Ok(Target {
                host: host.to_string(),
                port: port
                    .parse()
                    .with_context(|| format!("Invalid port in target {url}"))?,
            }),
            None => Ok(Target {
                host: url.to_string(),
                port: DEFAULT_PORT,
            }),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The server sends, `-R`.
    Download,
    Upload,
}

/// Speeds in Mbps, times in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SpeedTestResult {
    pub(crate) download_speed: f64,
    pub(crate) upload_speed: f64,
    pub(crate) jitter: f64,
    pub(crate) latency: f64,
}

impl SpeedTestResult {
    pub(crate) fn into_record(self, target: &Target) -> ResultRecord {
        ResultRecord::new()
            .with_field("download_speed", self.download_speed)
            .with_field("upload_speed", self.upload_speed)
            .with_field("jitter", self.jitter)
            .with_field("latency", self.latency)
            .with_field("target", target.to_string())
    }
}

/// Run a download test then an upload test against the target.
///
/// A direction that fails to run or produces no usable report measures as zero.
pub(crate) fn measure(target: &Target, duration_secs: u64) -> SpeedTestResult {
    let download = execute(target, duration_secs, Direction::Download);
    let upload = execute(target, duration_secs, Direction::Upload);

    from_reports(&download, &upload)
}

fn from_reports(download: &Value, upload: &Value) -> SpeedTestResult {
    SpeedTestResult {
        download_speed: speed(download),
        upload_speed: speed(upload),
        jitter: jitter(download).max(jitter(upload)),
        latency: latency(download),
    }
}

fn execute(target: &Target, duration_secs: u64, direction: Direction) -> Value {
    match run_iperf3(target, duration_secs, direction) {
        Ok(report) => report,
        Err(e) => {
            log::warn!("iperf3 {:?} test against {} failed: {:?}", direction, target, e);
            Value::Null
        }
    }
}

fn run_iperf3(target: &Target, duration_secs: u64, direction: Direction) -> anyhow::Result<Value> {
    let mut command = Command::new("iperf3");
    command
        .arg("-c")
        .arg(&target.host)
        .arg("-p")
        .arg(target.port.to_string())
        .arg("-t")
        .arg(duration_secs.to_string())
        // JSON output, UDP so that jitter is reported.
        .args(["-J", "-u"]);
    if direction == Direction::Download {
        command.arg("-R");
    }

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to start iperf3")?;

    let mut stdout = child.stdout.take().context("iperf3 stdout was not captured")?;
    let reader = std::thread::spawn(move || {
        let mut output = String::new();
        stdout.read_to_string(&mut output).map(|_| output)
    });

    let timeout = Duration::from_secs(duration_secs) + TIMEOUT_MARGIN;
    let deadline = Instant::now() + timeout;
    while child.try_wait()?.is_none() {
        if Instant::now() >= deadline {
            child.kill().ok();
            child.wait().ok();
            anyhow::bail!("iperf3 did not finish within {:?}", timeout);
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let output = reader
        .join()
        .map_err(|_| anyhow::anyhow!("iperf3 output reader panicked"))?
        .context("Failed to read iperf3 output")?;
    if output.trim().is_empty() {
        anyhow::bail!("iperf3 produced no output");
    }

    serde_json::from_str(&output).context("Failed to parse iperf3 output")
}

fn non_empty_object(value: &Value) -> Option<&Value> {
    value
        .as_object()
        .filter(|object| !object.is_empty())
        .map(|_| value)
}

/// `end.sum.bits_per_second`, falling back to `end.sum_received`, in Mbps.
fn speed(report: &Value) -> f64 {
    let end = &report["end"];
    non_empty_object(&end["sum"])
        .or_else(|| non_empty_object(&end["sum_received"]))
        .and_then(|sum| sum["bits_per_second"].as_f64())
        .map_or(0.0, |bps| bps / 1_000_000.0)
}

fn jitter(report: &Value) -> f64 {
    report["end"]["sum"]["jitter_ms"].as_f64().unwrap_or(0.0)
}

/// Mean RTT of the first stream, reported in microseconds.
fn latency(report: &Value) -> f64 {
    report["end"]["streams"][0]["sender"]["mean_rtt"]
        .as_f64()
        .map_or(0.0, |rtt| rtt / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_target() {
        assert_eq!(
            Target {
                host: "10.0.0.5".to_string(),
                port: 5202
            },
            Target::parse("10.0.0.5:5202").unwrap()
        );
        assert_eq!(
            Target {
                host: "speed.example.com".to_string(),
                port: DEFAULT_PORT
            },
            Target::parse("speed.example.com").unwrap()
        );
        assert!(Target::parse("10.0.0.5:http").is_err());
        assert_eq!("10.0.0.5:5201", Target::parse("10.0.0.5").unwrap().to_string());
    }

    #[test]
    fn metrics_from_reports() {
        let download = json!({
            "end": {
                "sum": { "bits_per_second": 94_500_000.0, "jitter_ms": 0.8 },
                "streams": [ { "sender": { "mean_rtt": 12_500 } } ]
            }
        });
        let upload = json!({
            "end": {
                "sum": {},
                "sum_received": { "bits_per_second": 40_000_000 },
                "streams": [ { "sender": { "mean_rtt": 99_000 } } ]
            }
        });

        assert_eq!(
            SpeedTestResult {
                download_speed: 94.5,
                upload_speed: 40.0,
                jitter: 0.8,
                latency: 12.5,
            },
            from_reports(&download, &upload)
        );
    }

    #[test]
    fn jitter_is_worst_of_both_directions() {
        let download = json!({ "end": { "sum": { "jitter_ms": 0.5 } } });
        let upload = json!({ "end": { "sum": { "jitter_ms": 2.25 } } });

        assert_eq!(2.25, from_reports(&download, &upload).jitter);
    }

    #[test]
    fn failed_runs_measure_zero() {
        let error_report = json!({ "error": "unable to connect to server: Connection refused" });

        assert_eq!(
            SpeedTestResult::default(),
            from_reports(&Value::Null, &error_report)
        );
    }

    #[test]
    fn record_has_numeric_metrics_and_target() {
        let target = Target::parse("10.0.0.5").unwrap();
        let record = SpeedTestResult {
            download_speed: 94.5,
            upload_speed: 40.0,
            jitter: 0.8,
            latency: 12.5,
        }
        .into_record(&target);

        assert_eq!(
            vec![
                ("download_speed".to_string(), 94.5),
                ("upload_speed".to_string(), 40.0),
                ("jitter".to_string(), 0.8),
                ("latency".to_string(), 12.5),
            ],
            record.metric_fields()
        );
        assert_eq!(5, record.fields().len());
    }
}
