use sluice_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Counter metrics of remote-write destinations.
///
/// All of them are tagged with `destination`.
pub enum RemoteCounters {
    /// Samples delivered.
    SamplesSent,
    /// Samples that failed with a non-recoverable error.
    SamplesFailed,
    /// Samples in a request that was retried.
    SamplesRetried,
    /// Samples dropped.
    ///
    /// Tagged with `reason`: `relabel` for write relabeling, `shutdown` for data still pending
    /// after the flush deadline.
    SamplesDropped,
    /// Exemplars delivered.
    ExemplarsSent,
    /// Exemplars that failed with a non-recoverable error.
    ExemplarsFailed,
    /// Exemplars in a request that was retried.
    ExemplarsRetried,
    /// Exemplars dropped, tagged with `reason`.
    ExemplarsDropped,
    /// Histograms delivered.
    HistogramsSent,
    /// Histograms that failed with a non-recoverable error.
    HistogramsFailed,
    /// Histograms in a request that was retried.
    HistogramsRetried,
    /// Histograms dropped, tagged with `reason`.
    HistogramsDropped,
    /// Metadata entries delivered.
    MetadataSent,
    /// Metadata entries that could not be delivered.
    MetadataFailed,
    /// Compressed payload bytes delivered.
    BytesSent,
    /// Enqueue attempts that found the shard queue full.
    EnqueueRetries,
}

impl CounterMetric for RemoteCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::SamplesSent => "remote.samples.sent",
            Self::SamplesFailed => "remote.samples.failed",
            Self::SamplesRetried => "remote.samples.retried",
            Self::SamplesDropped => "remote.samples.dropped",
            Self::ExemplarsSent => "remote.exemplars.sent",
            Self::ExemplarsFailed => "remote.exemplars.failed",
            Self::ExemplarsRetried => "remote.exemplars.retried",
            Self::ExemplarsDropped => "remote.exemplars.dropped",
            Self::HistogramsSent => "remote.histograms.sent",
            Self::HistogramsFailed => "remote.histograms.failed",
            Self::HistogramsRetried => "remote.histograms.retried",
            Self::HistogramsDropped => "remote.histograms.dropped",
            Self::MetadataSent => "remote.metadata.sent",
            Self::MetadataFailed => "remote.metadata.failed",
            Self::BytesSent => "remote.bytes.sent",
            Self::EnqueueRetries => "remote.enqueue.retries",
        }
    }
}

/// Gauge metrics of remote-write destinations, tagged with `destination`.
pub enum RemoteGauges {
    /// Samples enqueued but not yet sent.
    SamplesPending,
    /// Current number of shards.
    Shards,
    /// Number of shards the last recalculation asked for.
    ShardsDesired,
    /// Configured lower bound of shards.
    ShardsMin,
    /// Configured upper bound of shards.
    ShardsMax,
    /// Highest timestamp, in seconds, of data successfully sent.
    HighestSentTimestamp,
}

impl GaugeMetric for RemoteGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::SamplesPending => "remote.samples.pending",
            Self::Shards => "remote.shards",
            Self::ShardsDesired => "remote.shards.desired",
            Self::ShardsMin => "remote.shards.min",
            Self::ShardsMax => "remote.shards.max",
            Self::HighestSentTimestamp => "remote.highest_sent_timestamp",
        }
    }
}

/// Timer metrics of remote-write destinations, tagged with `destination`.
pub enum RemoteTimers {
    /// Time spent sending one batch, including retries.
    BatchDuration,
}

impl TimerMetric for RemoteTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::BatchDuration => "remote.batch.duration",
        }
    }
}
