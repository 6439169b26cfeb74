use load_test_model::ScenarioSummary;
use tabled::Tabled;

#[derive(Tabled)]
pub struct SummaryRow {
    pub metric: String,
    pub unit: &'static str,
    pub samples: usize,
    #[tabled(display = "float2")]
    pub avg: f64,
    #[tabled(display = "float2")]
    pub min: f64,
    #[tabled(display = "float2")]
    pub max: f64,
    #[tabled(display = "float2")]
    pub p50: f64,
    #[tabled(display = "float2")]
    pub p99: f64,
    #[tabled(display = "float2")]
    pub stddev: f64,
}

impl From<&ScenarioSummary> for SummaryRow {
    fn from(summary: &ScenarioSummary) -> Self {
        let statistics = &summary.statistics;
        Self {
            metric: summary.metric_name.clone(),
            unit: crate::units::canonical_unit(&summary.metric_name),
            samples: statistics.sample_count,
            avg: statistics.avg,
            min: statistics.min,
            max: statistics.max,
            p50: statistics.p50,
            p99: statistics.p99,
            stddev: statistics.stddev,
        }
    }
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
