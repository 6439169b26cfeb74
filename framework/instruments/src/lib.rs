//! Turning raw metric samples into statistics and verdicts.
//!
//! - [units] converts expected thresholds into the canonical unit of a metric.
//! - [aggregator] reduces the samples of a run or a whole scenario to statistics.
//! - [evaluator] compares those statistics against expectations and records the verdicts.
//! - [report] renders summaries and verdicts for the terminal.

pub mod aggregator;
pub mod evaluator;
pub mod report;
pub mod units;

pub use aggregator::MetricsAggregator;
pub use evaluator::ExpectationEvaluator;
pub use units::{canonical_unit, normalize_for_comparison, UnitCategory};
