use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_append::{AppendError, Appendable, Appender};
use sluice_identity::LabelStore;
use sluice_labels::{
    Exemplar, FloatHistogram, Histogram, Labels, METRIC_NAME, Metadata, is_stale_nan,
};
use sluice_relabel::{RelabelCache, RelabelConfig};
use tokio_util::sync::CancellationToken;

use crate::{
    HttpClientError, HttpWriteClient, MetadataEntry, QueueError, QueueManager, RemoteWriteConfig,
    SeriesData, TimeSeries, WriteClient,
};

impl From<QueueError> for AppendError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::ShuttingDown => AppendError::Closed,
            QueueError::NotStarted => AppendError::Remote(error.to_string()),
        }
    }
}

/// The pipeline destination for one remote-write endpoint.
///
/// Appenders buffer data until [`commit`](Appender::commit), which hands it to the endpoint's
/// [`QueueManager`]. For every series, the destination allocates a local reference and links it
/// to the global id in the [`LabelStore`], tracks stale markers, merges the external labels and
/// applies the endpoint's write relabel rules.
pub struct RemoteWrite {
    destination: Arc<Destination>,
}

impl RemoteWrite {
    /// Creates a destination that sends to the configured endpoint over HTTP.
    pub fn new(
        config: &RemoteWriteConfig,
        store: Arc<LabelStore>,
        external_labels: Labels,
        lifecycle: &CancellationToken,
    ) -> Result<Self, HttpClientError> {
        config.validate()?;
        let client = HttpWriteClient::new(config)?;
        Ok(Self::with_client(
            config,
            Arc::new(client),
            store,
            external_labels,
            lifecycle,
        ))
    }

    /// Creates a destination that sends through the given client.
    pub fn with_client(
        config: &RemoteWriteConfig,
        client: Arc<dyn WriteClient>,
        store: Arc<LabelStore>,
        external_labels: Labels,
        lifecycle: &CancellationToken,
    ) -> Self {
        let name = config.name().to_owned();
        let queue = QueueManager::new(
            name.clone(),
            config.queue_config.clone(),
            config.metadata_config.clone(),
            client,
            lifecycle,
        );

        let destination = Destination {
            cache: RelabelCache::new(name.clone(), store.clone()),
            name,
            store,
            queue,
            external_labels,
            write_relabel: config.write_relabel_configs.clone(),
            send_exemplars: config.send_exemplars,
            send_native_histograms: config.send_native_histograms,
            send_metadata: config.metadata_config.send,
            next_local_ref: AtomicU64::new(1),
            link_lock: Mutex::new(()),
        };

        Self {
            destination: Arc::new(destination),
        }
    }

    /// Starts the queue manager with the configured minimum number of shards.
    pub async fn start(&self) {
        let queue = &self.destination.queue;
        queue.start(queue.config().min_shards).await;
    }

    /// Stops the queue manager, flushing pending data within the flush deadline.
    pub async fn stop(&self) {
        self.destination.queue.stop().await;
    }

    /// Returns the destination name.
    pub fn name(&self) -> &str {
        &self.destination.name
    }

    /// Returns the queue manager of this destination.
    pub fn queue(&self) -> &QueueManager {
        &self.destination.queue
    }
}

impl std::fmt::Debug for RemoteWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWrite")
            .field("name", &self.destination.name)
            .field("queue", &self.destination.queue)
            .finish()
    }
}

impl Appendable for RemoteWrite {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(RemoteWriteAppender {
            destination: self.destination.clone(),
            series: Vec::new(),
            metadata: Vec::new(),
        })
    }
}

struct Destination {
    name: String,
    store: Arc<LabelStore>,
    queue: QueueManager,
    external_labels: Labels,
    write_relabel: Vec<RelabelConfig>,
    cache: RelabelCache,
    send_exemplars: bool,
    send_native_histograms: bool,
    send_metadata: bool,
    next_local_ref: AtomicU64,
    link_lock: Mutex<()>,
}

impl Destination {
    /// Returns the global id and the local reference of a series, linking them on first sight.
    fn resolve(&self, series_ref: u64, labels: &Labels) -> (u64, u64) {
        let global = match series_ref {
            0 => self.store.get_or_add_global_ref_id(labels),
            global => global,
        };

        let _guard = self.link_lock.lock();
        let local = self.store.get_local_ref_id(&self.name, global);
        if local != 0 {
            return (global, local);
        }

        let local = self.next_local_ref.fetch_add(1, Ordering::Relaxed);
        let global = self.store.get_or_add_link(&self.name, local, labels);
        (global, local)
    }

    /// Returns the labels to send for a series, or `None` if write relabeling drops it.
    fn relabel(&self, value: f64, global: u64, labels: &Labels) -> Option<Labels> {
        let labels = labels.merge_external(&self.external_labels);
        if self.write_relabel.is_empty() {
            return Some(labels);
        }

        self.cache
            .relabel(value, global, &labels, &self.write_relabel)
            .labels
    }

    fn track_staleness(&self, global: u64, labels: &Labels, stale: bool) {
        if stale {
            self.store.add_stale_marker(global, labels);
        } else {
            self.store.remove_stale_marker(global);
        }
    }
}

struct RemoteWriteAppender {
    destination: Arc<Destination>,
    series: Vec<TimeSeries>,
    metadata: Vec<MetadataEntry>,
}

impl RemoteWriteAppender {
    fn push(&mut self, global: u64, local: u64, value: f64, series: TimeSeries) {
        let kind = series.kind();
        match self.destination.relabel(value, global, &series.labels) {
            Some(labels) => self.series.push(TimeSeries {
                series_ref: local,
                labels,
                ..series
            }),
            None => self.destination.queue.record_dropped(kind),
        }
    }
}

#[async_trait]
impl Appender for RemoteWriteAppender {
    async fn append(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<u64, AppendError> {
        if labels.is_empty() {
            return Ok(0);
        }

        let (global, local) = self.destination.resolve(series_ref, labels);
        self.destination
            .track_staleness(global, labels, is_stale_nan(value));

        let series = TimeSeries::sample(local, labels.clone(), timestamp, value);
        self.push(global, local, value, series);
        Ok(global)
    }

    async fn append_exemplar(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> Result<u64, AppendError> {
        if !self.destination.send_exemplars || labels.is_empty() {
            return Ok(series_ref);
        }

        let (global, local) = self.destination.resolve(series_ref, labels);
        let series = TimeSeries {
            series_ref: local,
            labels: labels.clone(),
            timestamp: exemplar.timestamp.unwrap_or_default(),
            data: SeriesData::Exemplar(exemplar.clone()),
        };
        self.push(global, local, exemplar.value, series);
        Ok(global)
    }

    async fn append_histogram(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
    ) -> Result<u64, AppendError> {
        if !self.destination.send_native_histograms || labels.is_empty() {
            return Ok(series_ref);
        }

        let (sum, data) = match (histogram, float_histogram) {
            (Some(h), _) => (h.sum, SeriesData::Histogram(h.clone())),
            (None, Some(fh)) => (fh.sum, SeriesData::FloatHistogram(fh.clone())),
            (None, None) => return Ok(series_ref),
        };

        let (global, local) = self.destination.resolve(series_ref, labels);
        self.destination
            .track_staleness(global, labels, is_stale_nan(sum));

        let series = TimeSeries {
            series_ref: local,
            labels: labels.clone(),
            timestamp,
            data,
        };
        self.push(global, local, sum, series);
        Ok(global)
    }

    async fn update_metadata(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        metadata: &Metadata,
    ) -> Result<u64, AppendError> {
        let Some(name) = labels.get(METRIC_NAME) else {
            return Ok(series_ref);
        };

        if self.destination.send_metadata {
            self.metadata.push(MetadataEntry {
                metric_family_name: name.to_owned(),
                metadata: metadata.clone(),
            });
        }

        Ok(series_ref)
    }

    async fn commit(&mut self) -> Result<(), AppendError> {
        let series = std::mem::take(&mut self.series);
        let metadata = std::mem::take(&mut self.metadata);

        let queue = &self.destination.queue;
        let appended = queue.append(series).await;
        let sent_metadata = queue.append_metadata(metadata).await;

        appended.and(sent_metadata).map_err(AppendError::from)
    }

    async fn rollback(&mut self) -> Result<(), AppendError> {
        self.series.clear();
        self.metadata.clear();
        Ok(())
    }
}
