use sluice_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics of relabeling.
pub enum RelabelCounters {
    /// Incremented for every lookup answered from the relabel cache.
    ///
    /// This metric is tagged with:
    ///  - `cache`: Name of the cache.
    CacheHit,
    /// Incremented for every lookup that had to evaluate the rules.
    ///
    /// This metric is tagged with:
    ///  - `cache`: Name of the cache.
    CacheMiss,
    /// Incremented for every sample entering the relabel stage.
    Processed,
    /// Incremented for every sample the relabel stage forwards.
    Outgoing,
    /// Incremented for every sample the relabel stage drops.
    Dropped,
}

impl CounterMetric for RelabelCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::CacheHit => "relabel.cache.hit",
            Self::CacheMiss => "relabel.cache.miss",
            Self::Processed => "relabel.processed",
            Self::Outgoing => "relabel.outgoing",
            Self::Dropped => "relabel.dropped",
        }
    }
}

/// Gauge metrics of relabeling.
pub enum RelabelGauges {
    /// Number of entries in the relabel cache.
    ///
    /// This metric is tagged with:
    ///  - `cache`: Name of the cache.
    CacheSize,
}

impl GaugeMetric for RelabelGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::CacheSize => "relabel.cache.size",
        }
    }
}
