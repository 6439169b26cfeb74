use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A declared pass/fail threshold on a metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Expectation {
    /// The metric the threshold applies to, e.g. `latency`.
    pub metric: String,
    /// How the measured value is compared against [Expectation::value].
    pub operator: Operator,
    /// The expected threshold, expressed in [Expectation::unit].
    pub value: f64,
    /// The unit of [Expectation::value]. May be empty, in which case the value is assumed to be in
    /// the canonical unit of the metric.
    #[serde(default)]
    pub unit: String,
    /// Whether this expectation is checked after every run or once at the end of the scenario.
    pub evaluation_scope: EvaluationScope,
    /// Which scenario-level statistic is compared. Only used for [EvaluationScope::Scenario].
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl Expectation {
    /// The expected value and unit as recorded in the result log, e.g. `20 ms`.
    pub fn expected_text(&self) -> String {
        format!("{} {}", self.value, self.unit)
    }
}

/// Comparison operator of an [Expectation].
///
/// Operators that are not recognised are kept so that they can be reported, but they always
/// evaluate to a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Lte,
    Lt,
    Gte,
    Gt,
    /// Exact floating point equality, there is no tolerance.
    Eq,
    Unrecognized(String),
}

impl Operator {
    /// Returns true if `measured <op> expected` holds.
    pub fn compare(&self, measured: f64, expected: f64) -> bool {
        match self {
            Operator::Lte => measured <= expected,
            Operator::Lt => measured < expected,
            Operator::Gte => measured >= expected,
            Operator::Gt => measured > expected,
            #[allow(clippy::float_cmp)]
            Operator::Eq => measured == expected,
            Operator::Unrecognized(_) => false,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operator::Lte => "lte",
            Operator::Lt => "lt",
            Operator::Gte => "gte",
            Operator::Gt => "gt",
            Operator::Eq => "eq",
            Operator::Unrecognized(other) => other,
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lte" => Operator::Lte,
            "lt" => Operator::Lt,
            "gte" => Operator::Gte,
            "gt" => Operator::Gt,
            "eq" => Operator::Eq,
            _ => Operator::Unrecognized(value),
        }
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.as_str().to_string()
    }
}

/// Scenario-level statistic selected by a scenario scoped [Expectation].
///
/// Unknown names fall back to [Aggregation::Avg].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Aggregation {
    #[default]
    Avg,
    Min,
    Max,
    P50,
    P99,
    Stddev,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::P50 => "p50",
            Aggregation::P99 => "p99",
            Aggregation::Stddev => "stddev",
        }
    }
}

impl From<String> for Aggregation {
    fn from(value: String) -> Self {
        match value.as_str() {
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "p50" => Aggregation::P50,
            "p99" => Aggregation::P99,
            "stddev" => Aggregation::Stddev,
            _ => Aggregation::Avg,
        }
    }
}

impl From<Aggregation> for String {
    fn from(value: Aggregation) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationScope {
    /// Evaluated against the average of each run's samples, once per run.
    PerIteration,
    /// Evaluated against statistics over every sample of the scenario, once at finalization.
    Scenario,
}

impl EvaluationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationScope::PerIteration => "per_iteration",
            EvaluationScope::Scenario => "scenario",
        }
    }
}

impl Display for EvaluationScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn from_outcome(passed: bool) -> Self {
        if passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn operator_truth_table() {
        let cases = [
            (Operator::Lte, 5.0, 5.0, true),
            (Operator::Lte, 6.0, 5.0, false),
            (Operator::Lt, 5.0, 5.0, false),
            (Operator::Lt, 4.0, 5.0, true),
            (Operator::Gte, 5.0, 5.0, true),
            (Operator::Gte, 4.0, 5.0, false),
            (Operator::Gt, 5.0, 5.0, false),
            (Operator::Gt, 6.0, 5.0, true),
            (Operator::Eq, 5.0, 5.0, true),
            (Operator::Eq, 5.0, 5.000001, false),
        ];

        for (operator, measured, expected, outcome) in cases {
            assert_eq!(
                outcome,
                operator.compare(measured, expected),
                "{} {} {}",
                measured,
                operator.as_str(),
                expected
            );
        }
    }

    #[test]
    fn eq_uses_exact_float_equality() {
        // 0.1 + 0.2 is not exactly 0.3, so an eq expectation on a computed average fails.
        assert!(!Operator::Eq.compare(0.1 + 0.2, 0.3));
    }

    #[test]
    fn unrecognized_operator_always_fails() {
        let operator = Operator::from("approx".to_string());
        assert_eq!(Operator::Unrecognized("approx".to_string()), operator);
        assert!(!operator.compare(1.0, 1.0));
        assert!(!operator.compare(0.0, 1.0));
    }

    #[test]
    fn unknown_aggregation_falls_back_to_avg() {
        assert_eq!(Aggregation::Avg, Aggregation::from("median".to_string()));
        assert_eq!(Aggregation::P99, Aggregation::from("p99".to_string()));
    }

    #[test]
    fn deserialize_expectation_with_defaults() {
        let expectation: Expectation = serde_json::from_str(
            r#"{"metric": "latency", "operator": "lte", "value": 20, "evaluation_scope": "per_iteration"}"#,
        )
        .unwrap();

        assert_eq!(
            Expectation {
                metric: "latency".to_string(),
                operator: Operator::Lte,
                value: 20.0,
                unit: String::new(),
                evaluation_scope: EvaluationScope::PerIteration,
                aggregation: Aggregation::Avg,
            },
            expectation
        );
        assert_eq!("20 ", expectation.expected_text());
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let result = serde_json::from_str::<Expectation>(
            r#"{"metric": "latency", "operator": "lte", "value": 20, "evaluation_scope": "weekly"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn verdict_serializes_uppercase() {
        assert_eq!("\"PASS\"", serde_json::to_string(&Verdict::Pass).unwrap());
        assert_eq!("FAIL", Verdict::from_outcome(false).to_string());
    }
}
