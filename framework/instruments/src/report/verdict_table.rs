use load_test_model::ExpectationResult;
use tabled::Tabled;

#[derive(Tabled)]
pub struct VerdictRow {
    pub run_id: String,
    pub scope: String,
    pub metric: String,
    pub expected: String,
    pub measured: String,
    pub status: String,
}

impl From<&ExpectationResult> for VerdictRow {
    fn from(result: &ExpectationResult) -> Self {
        Self {
            run_id: result.run_id.to_string(),
            scope: result.scope.to_string(),
            metric: result.metric_name.clone(),
            expected: result.expected_value.clone(),
            measured: result.measured_value.clone(),
            status: result.status.to_string(),
        }
    }
}
