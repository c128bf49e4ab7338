use sluice_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics of the appender chain.
pub enum AppendCounters {
    /// Incremented for every error returned by a child of a fan-out.
    ///
    /// Child errors are not propagated to the producer, this is where they become visible.
    ///
    /// This metric is tagged with:
    ///  - `operation`: The appender operation that failed.
    FanoutChildError,
    /// Incremented for every sample dropped by a fan-out intercept function.
    FanoutDropped,
    /// Incremented for every sample passing a [`SamplePrinter`](crate::SamplePrinter).
    PrintedSamples,
}

impl CounterMetric for AppendCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::FanoutChildError => "append.fanout.child_error",
            Self::FanoutDropped => "append.fanout.dropped",
            Self::PrintedSamples => "append.printer.samples",
        }
    }
}

/// Gauge metrics of the appender chain.
pub enum AppendGauges {
    /// Number of distinct series seen by a [`SeriesCounter`](crate::SeriesCounter).
    ActiveSeries,
}

impl GaugeMetric for AppendGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::ActiveSeries => "append.series.active",
        }
    }
}
