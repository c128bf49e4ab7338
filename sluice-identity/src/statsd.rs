use sluice_statsd::{CounterMetric, GaugeMetric};

/// Gauge metrics of the label store.
pub enum LabelStoreGauges {
    /// Number of global series ids currently known to the label store.
    Series,
    /// Number of series currently marked stale and waiting for removal.
    StaleSeries,
}

impl GaugeMetric for LabelStoreGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::Series => "label_store.series",
            Self::StaleSeries => "label_store.stale.pending",
        }
    }
}

/// Counter metrics of the label store.
pub enum LabelStoreCounters {
    /// Incremented for every global id removed by the stale sweep.
    StaleRemoved,
}

impl CounterMetric for LabelStoreCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::StaleRemoved => "label_store.stale.removed",
        }
    }
}
