use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sluice_common::RetryBackoff;
use sluice_log::LogError;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ewma::{EWMA_WEIGHT, EwmaRate};
use crate::retry::{SendError, send_with_backoff};
use crate::shards::{ShardRates, ShardSet, desired_shards};
use crate::statsd::{RemoteCounters, RemoteGauges, RemoteTimers};
use crate::{
    MetadataConfig, MetadataEntry, QueueConfig, QueueError, SeriesCounts, SeriesKind,
    TimeSeries, WriteClient, build_metadata_request, build_write_request, encode_request,
};

/// First wait after an enqueue attempt found the shard queue full.
const ENQUEUE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// What happened to a batch of data points, for metrics.
#[derive(Clone, Copy, Debug)]
enum Outcome {
    Sent,
    Failed,
    Retried,
    Dropped(&'static str),
}

/// Delivers data points to one remote-write destination.
///
/// Data points are spread over a number of shards by their series reference, so that all
/// points of a series are sent in order by the same shard. Each shard collects points into
/// batches and sends them through the [`WriteClient`], retrying recoverable errors.
///
/// Once [started](Self::start), the manager periodically estimates the throughput it needs and
/// [reshards](Self::reshard) when the current shard count is off. Resharding flushes the old
/// shards before new ones are started, so ordering is only guaranteed between two reshards.
///
/// [`stop`](Self::stop) rejects new data, flushes pending batches within the flush deadline
/// and drops whatever is left after it.
pub struct QueueManager {
    inner: Arc<Inner>,
    loops: Mutex<JoinSet<()>>,
    reshard_rx: Mutex<Option<mpsc::Receiver<usize>>>,
}

impl QueueManager {
    /// Creates a stopped queue manager.
    ///
    /// Cancelling `lifecycle` shuts the manager down hard: pending data is dropped immediately.
    pub fn new(
        name: impl Into<String>,
        config: QueueConfig,
        metadata_config: MetadataConfig,
        client: Arc<dyn WriteClient>,
        lifecycle: &CancellationToken,
    ) -> Self {
        let interval = config.shard_update_interval();
        let (reshard_tx, reshard_rx) = mpsc::channel(1);

        let inner = Inner {
            name: name.into(),
            config,
            metadata_config,
            client,
            lifecycle: lifecycle.clone(),
            quit: lifecycle.child_token(),
            shards: RwLock::new(ShardSet::default()),
            num_shards: AtomicUsize::new(0),
            reshard_tx,
            data_in: EwmaRate::new(EWMA_WEIGHT, interval),
            data_out: EwmaRate::new(EWMA_WEIGHT, interval),
            data_dropped: EwmaRate::new(EWMA_WEIGHT, interval),
            data_out_duration: EwmaRate::new(EWMA_WEIGHT, interval),
            last_send: Mutex::new(Instant::now()),
            highest_recv_timestamp: AtomicI64::new(0),
            highest_sent_timestamp: AtomicI64::new(0),
            pending: AtomicI64::new(0),
            dropped_on_shutdown: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
            loops: Mutex::new(JoinSet::new()),
            reshard_rx: Mutex::new(Some(reshard_rx)),
        }
    }

    /// Starts `num_shards` shards and the background loops that adjust the shard count.
    ///
    /// The shard count is clamped to the configured bounds. Calling this again has no effect.
    pub async fn start(&self, num_shards: usize) {
        let Some(reshard_rx) = self.reshard_rx.lock().take() else {
            return;
        };

        let inner = &self.inner;
        sluice_statsd::metric!(
            gauge(RemoteGauges::ShardsMin) = inner.config.min_shards as u64,
            destination = &inner.name,
        );
        sluice_statsd::metric!(
            gauge(RemoteGauges::ShardsMax) = inner.config.max_shards as u64,
            destination = &inner.name,
        );

        {
            let mut shards = inner.shards.write().await;
            *shards = inner.start_shards(inner.clamp_shards(num_shards));
        }

        let mut loops = self.loops.lock();
        loops.spawn(inner.clone().update_shards_loop());
        loops.spawn(inner.clone().reshard_loop(reshard_rx));

        sluice_log::info!(
            destination = %inner.name,
            endpoint = inner.client.endpoint(),
            "started remote write queue",
        );
    }

    /// Queues data points for sending.
    ///
    /// Blocks while the target shard is full. Fails before the manager is started and once it is
    /// stopping, in which case the data points that were not queued are counted as dropped.
    pub async fn append(&self, series: Vec<TimeSeries>) -> Result<(), QueueError> {
        let mut series = series.into_iter();
        while let Some(next) = series.next() {
            let kind = next.kind();
            if let Err(error) = self.inner.append_one(next).await {
                let mut counts = SeriesCounts::of(series.as_slice());
                counts.add(kind);
                let reason = match error {
                    QueueError::ShuttingDown => "shutdown",
                    QueueError::NotStarted => "not_started",
                };
                self.inner.count(counts, Outcome::Dropped(reason));
                return Err(error);
            }
        }

        Ok(())
    }

    /// Sends metric metadata in batches of the configured size.
    ///
    /// Metadata is sent directly, bypassing the shards, with the same retry policy as samples.
    pub async fn append_metadata(&self, metadata: Vec<MetadataEntry>) -> Result<(), QueueError> {
        let inner = &self.inner;
        if !inner.metadata_config.send || metadata.is_empty() {
            return Ok(());
        }

        for chunk in metadata.chunks(inner.metadata_config.max_samples_per_send.max(1)) {
            if inner.quit.is_cancelled() {
                return Err(QueueError::ShuttingDown);
            }

            let count = chunk.len() as i64;
            let payload = match encode_request(&build_metadata_request(chunk)) {
                Ok(payload) => payload,
                Err(error) => {
                    sluice_log::error!(
                        destination = %inner.name,
                        error = &error as &dyn std::error::Error,
                        "failed to encode metadata",
                    );
                    sluice_statsd::metric!(
                        counter(RemoteCounters::MetadataFailed) += count,
                        destination = &inner.name,
                    );
                    continue;
                }
            };

            let result = send_with_backoff(
                inner.client.as_ref(),
                payload,
                inner.config.min_backoff(),
                inner.config.max_backoff(),
                &inner.quit,
                |_| {},
            )
            .await;

            match result {
                Ok(()) => {
                    sluice_statsd::metric!(
                        counter(RemoteCounters::MetadataSent) += count,
                        destination = &inner.name,
                    );
                }
                Err(SendError::Store(error)) => {
                    sluice_log::error!(
                        destination = %inner.name,
                        error = &error as &dyn std::error::Error,
                        "non-recoverable error while sending metadata",
                    );
                    sluice_statsd::metric!(
                        counter(RemoteCounters::MetadataFailed) += count,
                        destination = &inner.name,
                    );
                }
                Err(SendError::Cancelled) => {
                    sluice_statsd::metric!(
                        counter(RemoteCounters::MetadataFailed) += count,
                        destination = &inner.name,
                    );
                    return Err(QueueError::ShuttingDown);
                }
            }
        }

        Ok(())
    }

    /// Counts a data point dropped before it reached the queue, for instance by relabeling.
    ///
    /// Dropped data lowers the throughput the shards have to provide.
    pub fn record_dropped(&self, kind: SeriesKind) {
        let mut counts = SeriesCounts::default();
        counts.add(kind);
        self.inner.count(counts, Outcome::Dropped("relabel"));
        self.inner.data_dropped.incr(1);
    }

    /// Flushes the current shards and starts `num_shards` new ones.
    pub async fn reshard(&self, num_shards: usize) {
        self.inner.reshard(num_shards).await;
    }

    /// Stops the background loops and flushes all shards.
    ///
    /// Data still pending after the flush deadline is dropped.
    pub async fn stop(&self) {
        sluice_log::info!(destination = %self.inner.name, "stopping remote write queue");
        self.inner.quit.cancel();

        let mut loops = std::mem::take(&mut *self.loops.lock());
        while loops.join_next().await.is_some() {}

        let mut shards = self.inner.shards.write().await;
        self.inner.stop_shards(&mut shards).await;

        sluice_log::info!(destination = %self.inner.name, "remote write queue stopped");
    }

    /// Returns the current number of shards.
    pub fn num_shards(&self) -> usize {
        self.inner.num_shards.load(Ordering::Relaxed)
    }

    /// Returns the destination name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("name", &self.inner.name)
            .field("num_shards", &self.num_shards())
            .finish()
    }
}

/// State shared between the queue manager, its loops and its shards.
pub(crate) struct Inner {
    name: String,
    config: QueueConfig,
    metadata_config: MetadataConfig,
    client: Arc<dyn WriteClient>,
    lifecycle: CancellationToken,
    quit: CancellationToken,

    shards: RwLock<ShardSet>,
    num_shards: AtomicUsize,
    reshard_tx: mpsc::Sender<usize>,

    data_in: EwmaRate,
    data_out: EwmaRate,
    data_dropped: EwmaRate,
    data_out_duration: EwmaRate,

    last_send: Mutex<Instant>,
    highest_recv_timestamp: AtomicI64,
    highest_sent_timestamp: AtomicI64,
    pending: AtomicI64,
    dropped_on_shutdown: AtomicU64,
}

impl Inner {
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &CancellationToken {
        &self.lifecycle
    }

    fn clamp_shards(&self, num_shards: usize) -> usize {
        num_shards.clamp(self.config.min_shards, self.config.max_shards.max(self.config.min_shards))
    }

    fn start_shards(self: &Arc<Self>, num_shards: usize) -> ShardSet {
        self.num_shards.store(num_shards, Ordering::Relaxed);
        sluice_statsd::metric!(
            gauge(RemoteGauges::Shards) = num_shards as u64,
            destination = &self.name,
        );
        ShardSet::start(self, num_shards)
    }

    /// Flushes and stops the shards of `set`, leaving it empty.
    async fn stop_shards(&self, set: &mut ShardSet) {
        if set.queues.is_empty() {
            return;
        }

        self.dropped_on_shutdown.store(0, Ordering::Relaxed);
        set.soft_shutdown.cancel();

        let flushed = tokio::time::timeout(self.config.flush_deadline(), async {
            while set.tasks.join_next().await.is_some() {}
        })
        .await;

        if flushed.is_err() {
            set.hard_shutdown.cancel();
            while set.tasks.join_next().await.is_some() {}
        }

        let dropped = self.dropped_on_shutdown.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            sluice_log::error!(
                destination = %self.name,
                dropped,
                "failed to flush all data points on shutdown",
            );
        }

        *set = ShardSet::default();
    }

    async fn reshard(self: &Arc<Self>, num_shards: usize) {
        let num_shards = self.clamp_shards(num_shards);
        sluice_log::info!(destination = %self.name, num_shards, "resharding");

        let mut shards = self.shards.write().await;
        self.stop_shards(&mut shards).await;
        *shards = self.start_shards(num_shards);
    }

    async fn append_one(&self, series: TimeSeries) -> Result<(), QueueError> {
        if self.quit.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }
        if self.num_shards.load(Ordering::Relaxed) == 0 {
            return Err(QueueError::NotStarted);
        }

        self.highest_recv_timestamp
            .fetch_max(series.timestamp, Ordering::Relaxed);
        self.data_in.incr(1);

        let mut series = series;
        let mut backoff = RetryBackoff::new(ENQUEUE_INITIAL_BACKOFF, self.config.max_backoff());
        loop {
            series = match self.enqueue(series) {
                Ok(()) => break,
                Err(rejected) => rejected,
            };

            sluice_statsd::metric!(
                counter(RemoteCounters::EnqueueRetries) += 1,
                destination = &self.name,
            );

            tokio::select! {
                biased;
                _ = self.quit.cancelled() => return Err(QueueError::ShuttingDown),
                _ = tokio::time::sleep(backoff.next_backoff()) => (),
            }
        }

        if backoff.started() {
            sluice_log::debug!(
                destination = %self.name,
                attempts = backoff.attempt(),
                "queued data point after shard queue was full",
            );
        }

        Ok(())
    }

    /// Tries to add a data point to its shard without waiting.
    ///
    /// Fails while a reshard is in progress or the shard queue is full.
    fn enqueue(&self, series: TimeSeries) -> Result<(), TimeSeries> {
        let Ok(shards) = self.shards.try_read() else {
            return Err(series);
        };

        shards.enqueue(series)?;

        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        self.report_pending(pending);
        Ok(())
    }

    /// Sends a batch, retrying recoverable errors until `cancel` fires.
    pub async fn send_batch(&self, batch: Vec<TimeSeries>, cancel: &CancellationToken) {
        let counts = SeriesCounts::of(&batch);
        let highest_timestamp = batch.iter().map(|series| series.timestamp).max();
        let start = Instant::now();

        let result = match encode_request(&build_write_request(&batch)) {
            Ok(payload) => {
                let bytes = payload.len();
                send_with_backoff(
                    self.client.as_ref(),
                    payload,
                    self.config.min_backoff(),
                    self.config.max_backoff(),
                    cancel,
                    |_| self.count(counts, Outcome::Retried),
                )
                .await
                .map(|()| bytes)
            }
            Err(error) => Err(SendError::Store(error)),
        };

        let elapsed = start.elapsed();
        match result {
            Ok(bytes) => {
                self.count(counts, Outcome::Sent);
                sluice_statsd::metric!(
                    counter(RemoteCounters::BytesSent) += bytes as i64,
                    destination = &self.name,
                );

                if let Some(timestamp) = highest_timestamp {
                    let highest = self
                        .highest_sent_timestamp
                        .fetch_max(timestamp, Ordering::Relaxed)
                        .max(timestamp);
                    sluice_statsd::metric!(
                        gauge(RemoteGauges::HighestSentTimestamp) = (highest.max(0) / 1000) as u64,
                        destination = &self.name,
                    );
                }

                *self.last_send.lock() = Instant::now();
                self.data_out.incr(counts.total());
                self.data_out_duration
                    .incr(elapsed.as_nanos().min(i64::MAX as u128) as i64);
            }
            Err(SendError::Store(error)) => {
                sluice_log::error!(
                    destination = %self.name,
                    count = counts.total(),
                    error = &error as &dyn std::error::Error,
                    "non-recoverable error while sending batch",
                );
                self.count(counts, Outcome::Failed);
            }
            Err(SendError::Cancelled) => {
                self.dropped_on_shutdown
                    .fetch_add(counts.total() as u64, Ordering::Relaxed);
                self.count(counts, Outcome::Dropped("shutdown"));
            }
        }

        sluice_statsd::metric!(
            timer(RemoteTimers::BatchDuration) = elapsed,
            destination = &self.name,
        );

        let pending = self.pending.fetch_sub(counts.total(), Ordering::Relaxed) - counts.total();
        self.report_pending(pending);
    }

    /// Drops data points still queued after a hard shutdown.
    pub fn drop_on_shutdown(&self, batch: &[TimeSeries]) {
        if batch.is_empty() {
            return;
        }

        let counts = SeriesCounts::of(batch);
        self.dropped_on_shutdown
            .fetch_add(counts.total() as u64, Ordering::Relaxed);
        self.count(counts, Outcome::Dropped("shutdown"));

        let pending = self.pending.fetch_sub(counts.total(), Ordering::Relaxed) - counts.total();
        self.report_pending(pending);
    }

    fn report_pending(&self, pending: i64) {
        sluice_statsd::metric!(
            gauge(RemoteGauges::SamplesPending) = pending.max(0) as u64,
            destination = &self.name,
        );
    }

    fn count(&self, counts: SeriesCounts, outcome: Outcome) {
        let (samples, exemplars, histograms) = match outcome {
            Outcome::Sent => (
                RemoteCounters::SamplesSent,
                RemoteCounters::ExemplarsSent,
                RemoteCounters::HistogramsSent,
            ),
            Outcome::Failed => (
                RemoteCounters::SamplesFailed,
                RemoteCounters::ExemplarsFailed,
                RemoteCounters::HistogramsFailed,
            ),
            Outcome::Retried => (
                RemoteCounters::SamplesRetried,
                RemoteCounters::ExemplarsRetried,
                RemoteCounters::HistogramsRetried,
            ),
            Outcome::Dropped(reason) => {
                sluice_statsd::metric!(
                    counter(RemoteCounters::SamplesDropped) += counts.samples,
                    destination = &self.name,
                    reason = reason,
                );
                sluice_statsd::metric!(
                    counter(RemoteCounters::ExemplarsDropped) += counts.exemplars,
                    destination = &self.name,
                    reason = reason,
                );
                sluice_statsd::metric!(
                    counter(RemoteCounters::HistogramsDropped) += counts.histograms,
                    destination = &self.name,
                    reason = reason,
                );
                return;
            }
        };

        sluice_statsd::metric!(
            counter(samples) += counts.samples,
            destination = &self.name,
        );
        sluice_statsd::metric!(
            counter(exemplars) += counts.exemplars,
            destination = &self.name,
        );
        sluice_statsd::metric!(
            counter(histograms) += counts.histograms,
            destination = &self.name,
        );
    }

    fn shard_rates(&self) -> ShardRates {
        let highest_recv = self.highest_recv_timestamp.load(Ordering::Relaxed);
        let highest_sent = self.highest_sent_timestamp.load(Ordering::Relaxed);

        ShardRates {
            data_in: self.data_in.rate(),
            data_out: self.data_out.rate(),
            data_dropped: self.data_dropped.rate(),
            data_out_duration: self.data_out_duration.rate() / 1e9,
            delay: (highest_recv - highest_sent) as f64 / 1000.0,
        }
    }

    /// Returns `true` if the shard count should change to `desired`.
    ///
    /// Resharding is skipped while the destination has not accepted data for twice the batch
    /// send deadline.
    fn should_reshard(&self, desired: usize) -> bool {
        if desired == self.num_shards.load(Ordering::Relaxed) {
            return false;
        }

        let since_last_send = self.last_send.lock().elapsed();
        if since_last_send > self.config.batch_send_deadline() * 2 {
            sluice_log::warn!(
                destination = %self.name,
                since_last_send = ?since_last_send,
                "skipping resharding, last successful send was beyond threshold",
            );
            return false;
        }

        true
    }

    async fn update_shards_loop(self: Arc<Self>) {
        let period = self.config.shard_update_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.quit.cancelled() => return,
                _ = ticker.tick() => (),
            }

            self.data_in.tick();
            self.data_out.tick();
            self.data_dropped.tick();
            self.data_out_duration.tick();

            let current = self.num_shards.load(Ordering::Relaxed);
            let desired = desired_shards(
                current,
                self.config.min_shards,
                self.config.max_shards,
                &self.shard_rates(),
            );
            sluice_statsd::metric!(
                gauge(RemoteGauges::ShardsDesired) = desired as u64,
                destination = &self.name,
            );

            if self.should_reshard(desired) {
                // A full channel means a reshard is already pending.
                if let Err(error) = self.reshard_tx.try_send(desired) {
                    sluice_log::debug!(
                        destination = %self.name,
                        "skipping resharding: {}",
                        LogError(&error),
                    );
                }
            }
        }
    }

    async fn reshard_loop(self: Arc<Self>, mut requests: mpsc::Receiver<usize>) {
        loop {
            let num_shards = tokio::select! {
                biased;
                _ = self.quit.cancelled() => return,
                request = requests.recv() => match request {
                    Some(num_shards) => num_shards,
                    None => return,
                },
            };

            self.reshard(num_shards).await;
        }
    }
}
