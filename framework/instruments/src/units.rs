//! Conversion of expected thresholds into the canonical unit of a metric.
//!
//! Protocol handlers always report in canonical units:
//! - speed: Mbps
//! - time: ms
//! - count: no unit
//!
//! Expectations may be written in any recognized unit, so only the expected side of a comparison
//! is ever converted.

/// Multipliers converting a value in the given unit to Mbps.
///
/// Byte rate spellings such as `MBps` lower-case to the bit rate entries and are not separately
/// recognized.
const SPEED_CONVERSIONS: &[(&str, f64)] = &[
    ("bps", 1.0 / 1_000_000.0),
    ("kbps", 1.0 / 1_000.0),
    ("mbps", 1.0),
    ("gbps", 1_000.0),
];

/// Multipliers converting a value in the given unit to milliseconds.
const TIME_CONVERSIONS: &[(&str, f64)] = &[
    ("ns", 1.0 / 1_000_000.0),
    ("us", 1.0 / 1_000.0),
    ("ms", 1.0),
    ("s", 1_000.0),
    ("sec", 1_000.0),
    ("seconds", 1_000.0),
    ("min", 60_000.0),
    ("minutes", 60_000.0),
];

const COUNT_CONVERSIONS: &[(&str, f64)] = &[("count", 1.0), ("", 1.0)];

/// The unit family a metric belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCategory {
    Speed,
    Time,
    Count,
}

impl UnitCategory {
    /// Classify a metric by name. Metrics that are not known are counts.
    pub fn of(metric_name: &str) -> Self {
        match metric_name {
            "download_speed" | "upload_speed" => UnitCategory::Speed,
            "latency" | "jitter" | "page_load_time" | "ttfb" | "dom_content_loaded" => {
                UnitCategory::Time
            }
            // resource_count, redirect_count, http_response_code and anything unknown
            _ => UnitCategory::Count,
        }
    }

    pub fn canonical_unit(self) -> &'static str {
        match self {
            UnitCategory::Speed => "mbps",
            UnitCategory::Time => "ms",
            UnitCategory::Count => "count",
        }
    }

    /// Every recognized unit spelling of this category with its multiplier to the canonical unit.
    pub fn conversions(self) -> &'static [(&'static str, f64)] {
        match self {
            UnitCategory::Speed => SPEED_CONVERSIONS,
            UnitCategory::Time => TIME_CONVERSIONS,
            UnitCategory::Count => COUNT_CONVERSIONS,
        }
    }

    /// Case-insensitive lookup of the multiplier for `unit`.
    pub fn multiplier(self, unit: &str) -> Option<f64> {
        let unit = unit.to_lowercase();
        self.conversions()
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, multiplier)| *multiplier)
    }
}

/// The canonical unit for a metric, e.g. `ms` for `latency`.
pub fn canonical_unit(metric_name: &str) -> &'static str {
    UnitCategory::of(metric_name).canonical_unit()
}

/// Convert `value` from `unit` to the canonical unit of `metric_name`.
///
/// Units that are not recognized for the metric's category leave the value unchanged.
pub fn to_canonical(value: f64, unit: &str, metric_name: &str) -> f64 {
    match UnitCategory::of(metric_name).multiplier(unit) {
        Some(multiplier) => value * multiplier,
        None => value,
    }
}

/// Convert `value` from the canonical unit of `metric_name` to `unit`.
pub fn from_canonical(value: f64, unit: &str, metric_name: &str) -> f64 {
    match UnitCategory::of(metric_name).multiplier(unit) {
        Some(multiplier) if multiplier != 0.0 => value / multiplier,
        _ => value,
    }
}

/// Bring a measured and an expected value into the same unit.
///
/// The measured value is already canonical and is returned untouched, the expected value is
/// converted from `expected_unit`.
pub fn normalize_for_comparison(
    measured: f64,
    expected: f64,
    expected_unit: &str,
    metric_name: &str,
) -> (f64, f64) {
    (measured, to_canonical(expected, expected_unit, metric_name))
}
