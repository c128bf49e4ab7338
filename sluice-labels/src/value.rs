use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Labels;

/// Bit pattern of the staleness marker.
pub const STALE_NAN_BITS: u64 = 0x7ff0000000000002;

/// The staleness marker value.
///
/// A sample with this value signals that its series disappeared. It is a NaN, so it must be
/// compared with [`is_stale_nan`] rather than `==`.
pub const STALE_NAN: f64 = f64::from_bits(STALE_NAN_BITS);

/// Returns `true` if the value is exactly the staleness marker.
#[inline]
pub fn is_stale_nan(value: f64) -> bool {
    value.to_bits() == STALE_NAN_BITS
}

/// An example observation attached to a sample, for instance a trace reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// Labels of the exemplar, such as `trace_id`.
    pub labels: Labels,
    /// Observed value.
    pub value: f64,
    /// Timestamp in milliseconds, if known.
    pub timestamp: Option<i64>,
}

/// A span of consecutive populated buckets in a native histogram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BucketSpan {
    /// Gap to the previous span, or the starting index for the first span.
    pub offset: i32,
    /// Number of consecutive buckets.
    pub length: u32,
}

/// Hint on whether a histogram sample follows a counter reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CounterResetHint {
    /// No information about resets.
    #[default]
    Unknown,
    /// A counter reset happened.
    CounterReset,
    /// No counter reset happened.
    NotCounterReset,
    /// The histogram is a gauge histogram.
    Gauge,
}

/// A native histogram with integer counts.
///
/// Bucket counts are delta encoded: each entry is the difference to the previous bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Histogram {
    /// Counter reset hint.
    pub counter_reset_hint: CounterResetHint,
    /// Resolution of the exponential buckets.
    pub schema: i32,
    /// Width of the zero bucket.
    pub zero_threshold: f64,
    /// Observations in the zero bucket.
    pub zero_count: u64,
    /// Total number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Spans of positive buckets.
    pub positive_spans: Vec<BucketSpan>,
    /// Spans of negative buckets.
    pub negative_spans: Vec<BucketSpan>,
    /// Delta encoded positive bucket counts.
    pub positive_buckets: Vec<i64>,
    /// Delta encoded negative bucket counts.
    pub negative_buckets: Vec<i64>,
}

/// A native histogram with float counts.
///
/// Bucket counts are absolute.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloatHistogram {
    /// Counter reset hint.
    pub counter_reset_hint: CounterResetHint,
    /// Resolution of the exponential buckets.
    pub schema: i32,
    /// Width of the zero bucket.
    pub zero_threshold: f64,
    /// Observations in the zero bucket.
    pub zero_count: f64,
    /// Total number of observations.
    pub count: f64,
    /// Sum of all observations.
    pub sum: f64,
    /// Spans of positive buckets.
    pub positive_spans: Vec<BucketSpan>,
    /// Spans of negative buckets.
    pub negative_spans: Vec<BucketSpan>,
    /// Positive bucket counts.
    pub positive_buckets: Vec<f64>,
    /// Negative bucket counts.
    pub negative_buckets: Vec<f64>,
}

/// The type of a metric family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Type is not known.
    #[default]
    Unknown,
    /// Monotonic counter.
    Counter,
    /// Arbitrary value.
    Gauge,
    /// Histogram.
    Histogram,
    /// Histogram of gauge values.
    GaugeHistogram,
    /// Summary with quantiles.
    Summary,
    /// Informational series.
    Info,
    /// Set of boolean states.
    StateSet,
}

impl MetricType {
    /// Returns the textual representation of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::GaugeHistogram => "gaugehistogram",
            Self::Summary => "summary",
            Self::Info => "info",
            Self::StateSet => "stateset",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive information about a metric family.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// The metric type.
    pub metric_type: MetricType,
    /// Help text.
    pub help: String,
    /// Unit of the values.
    pub unit: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_nan() {
        assert!(is_stale_nan(STALE_NAN));
        assert!(STALE_NAN.is_nan());
        assert!(!is_stale_nan(f64::NAN));
        assert!(!is_stale_nan(0.0));
    }

    #[test]
    fn test_metric_type_display() {
        assert_eq!(MetricType::GaugeHistogram.to_string(), "gaugehistogram");
        assert_eq!(MetricType::default(), MetricType::Unknown);
    }
}
