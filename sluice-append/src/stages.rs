use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_labels::{Exemplar, Labels, is_stale_nan};

use crate::statsd::{AppendCounters, AppendGauges};
use crate::{AppendError, AppendHook, Appender};

/// Counts the distinct series that are currently active.
///
/// A series becomes active with its first sample and inactive with a staleness marker.
#[derive(Debug, Default)]
pub struct SeriesCounter {
    active: Mutex<hashbrown::HashSet<u64>>,
}

impl SeriesCounter {
    /// Creates a counter without active series.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of active series.
    pub fn active_series(&self) -> usize {
        self.active.lock().len()
    }
}

#[async_trait]
impl AppendHook for SeriesCounter {
    async fn on_append(
        &self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        let active = {
            let mut active = self.active.lock();
            if is_stale_nan(value) {
                active.remove(&labels.hash64());
            } else {
                active.insert(labels.hash64());
            }
            active.len()
        };
        sluice_statsd::metric!(gauge(AppendGauges::ActiveSeries) = active as u64);

        next.append(series_ref, labels, timestamp, value).await
    }
}

/// Logs every sample and exemplar at info level before forwarding it.
#[derive(Debug, Default)]
pub struct SamplePrinter;

#[async_trait]
impl AppendHook for SamplePrinter {
    async fn on_append(
        &self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        sluice_log::info!(%labels, timestamp, value, "sample");
        sluice_statsd::metric!(counter(AppendCounters::PrintedSamples) += 1);

        next.append(series_ref, labels, timestamp, value).await
    }

    async fn on_append_exemplar(
        &self,
        series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        sluice_log::info!(
            %labels,
            exemplar.labels = %exemplar.labels,
            exemplar.value = exemplar.value,
            "exemplar"
        );

        next.append_exemplar(series_ref, labels, exemplar).await
    }
}
