mod iperf;

use load_test_runner::prelude::*;
use serde_json::Value;

use crate::iperf::Target;

const DEFAULT_DURATION_SECS: u64 = 10;

/// Measure every target in `target_url` with iperf3, one record per target.
fn run_speed_test(parameters: &Parameters) -> LoadTestResult<Vec<ResultRecord>> {
    let duration = parameters
        .get("duration")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_DURATION_SECS);

    target_urls(parameters)?
        .into_iter()
        .map(|url| {
            let target = Target::parse(&url)?;
            let result = iperf::measure(&target, duration);
            log::debug!("Speed test against {}: {:?}", target, result);
            Ok(result.into_record(&target))
        })
        .collect()
}

/// `target_url` is a list of `host:port` strings, a single string is accepted too.
fn target_urls(parameters: &Parameters) -> anyhow::Result<Vec<String>> {
    match parameters.get("target_url") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(url)) => Ok(vec![url.clone()]),
        Some(Value::Array(urls)) => urls
            .iter()
            .map(|url| {
                url.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("target_url entries must be strings, got {url}"))
            })
            .collect(),
        Some(other) => anyhow::bail!("target_url must be a list of host:port strings, got {other}"),
    }
}

fn main() -> LoadTestResult<()> {
    let handlers = HandlerRegistry::new().with_handler("speed_test", run_speed_test);

    run(handlers)
}
