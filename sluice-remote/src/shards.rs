use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::TimeSeries;
use crate::queue::Inner;

/// Fraction by which the desired shard count may deviate before a reshard is triggered.
pub const SHARD_TOLERANCE: f64 = 0.3;

/// Delay in seconds beyond which the shard count is never reduced.
pub const MAX_DOWNSHARD_DELAY: f64 = 10.0;

/// Share of the backlog the shards aim to catch up with per second.
const BACKLOG_CATCHUP: f64 = 0.05;

/// Throughput estimates feeding the shard count calculation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ShardRates {
    /// Data points received per second.
    pub data_in: f64,
    /// Data points sent per second.
    pub data_out: f64,
    /// Data points dropped per second.
    pub data_dropped: f64,
    /// Seconds spent sending per second.
    pub data_out_duration: f64,
    /// Seconds between the newest received and the newest sent data point.
    pub delay: f64,
}

/// Computes the shard count needed to keep up with the incoming rate.
///
/// The current count is kept while the estimate stays within [`SHARD_TOLERANCE`] of it, and
/// while the queue is more than [`MAX_DOWNSHARD_DELAY`] seconds behind the estimate may only
/// grow. The result always lies within `min_shards..=max_shards`.
pub fn desired_shards(
    current: usize,
    min_shards: usize,
    max_shards: usize,
    rates: &ShardRates,
) -> usize {
    let clamp = |shards: usize| shards.clamp(min_shards, max_shards.max(min_shards));

    if rates.data_out <= 0.0 {
        return clamp(current);
    }

    let data_kept_ratio = rates.data_out / (rates.data_dropped + rates.data_out);
    let delay = rates.delay.max(0.0);
    let data_pending = delay * rates.data_in * data_kept_ratio;

    let time_per_sample = rates.data_out_duration / rates.data_out;
    let desired =
        (time_per_sample * (rates.data_in * data_kept_ratio + BACKLOG_CATCHUP * data_pending))
            .ceil();

    let current_f = current as f64;
    let lower_bound = current_f * (1.0 - SHARD_TOLERANCE);
    let upper_bound = current_f * (1.0 + SHARD_TOLERANCE);
    if (lower_bound..=upper_bound).contains(&desired) {
        return clamp(current);
    }

    let desired = if desired.is_finite() && desired > 0.0 {
        desired as usize
    } else {
        0
    };

    if desired < current && delay > MAX_DOWNSHARD_DELAY {
        return clamp(current);
    }

    clamp(desired)
}

/// The queue of one shard.
///
/// Data points are collected into a partial batch. A full batch is handed to the shard's sender
/// task through a bounded channel.
#[derive(Debug)]
pub(crate) struct ShardQueue {
    batch: Mutex<Vec<TimeSeries>>,
    full_batches: mpsc::Sender<Vec<TimeSeries>>,
    max_batch: usize,
}

impl ShardQueue {
    fn new(max_batch: usize, batches: usize) -> (Self, mpsc::Receiver<Vec<TimeSeries>>) {
        let (tx, rx) = mpsc::channel(batches.max(1));
        let queue = Self {
            batch: Mutex::new(Vec::with_capacity(max_batch)),
            full_batches: tx,
            max_batch: max_batch.max(1),
        };
        (queue, rx)
    }

    /// Adds a data point, or returns it if its batch is full and the channel has no room.
    pub fn append(&self, series: TimeSeries) -> Result<(), TimeSeries> {
        let mut batch = self.batch.lock();
        if batch.len() + 1 < self.max_batch {
            batch.push(series);
            return Ok(());
        }

        let Ok(permit) = self.full_batches.try_reserve() else {
            return Err(series);
        };

        batch.push(series);
        let full = std::mem::replace(&mut *batch, Vec::with_capacity(self.max_batch));
        permit.send(full);
        Ok(())
    }

    /// Takes the partial batch.
    pub fn take_partial(&self) -> Vec<TimeSeries> {
        std::mem::take(&mut *self.batch.lock())
    }
}

/// The shards of one generation, between two reshards.
#[derive(Debug, Default)]
pub(crate) struct ShardSet {
    pub queues: Vec<Arc<ShardQueue>>,
    pub soft_shutdown: CancellationToken,
    pub hard_shutdown: CancellationToken,
    pub tasks: JoinSet<()>,
}

impl ShardSet {
    /// Creates `num_shards` queues and spawns a sender task for each.
    pub fn start(inner: &Arc<Inner>, num_shards: usize) -> Self {
        let config = inner.config();
        let soft_shutdown = CancellationToken::new();
        let hard_shutdown = inner.lifecycle().child_token();
        let mut tasks = JoinSet::new();

        let queues = (0..num_shards)
            .map(|_| {
                let (queue, rx) =
                    ShardQueue::new(config.max_samples_per_send, config.batches_per_shard());
                let queue = Arc::new(queue);

                tasks.spawn(run_shard(
                    inner.clone(),
                    queue.clone(),
                    rx,
                    soft_shutdown.clone(),
                    hard_shutdown.clone(),
                ));

                queue
            })
            .collect();

        Self {
            queues,
            soft_shutdown,
            hard_shutdown,
            tasks,
        }
    }

    /// Returns `true` if the set accepts new data points.
    pub fn is_accepting(&self) -> bool {
        !self.queues.is_empty() && !self.soft_shutdown.is_cancelled()
    }

    /// Routes a data point to the shard selected by its reference.
    pub fn enqueue(&self, series: TimeSeries) -> Result<(), TimeSeries> {
        if !self.is_accepting() {
            return Err(series);
        }

        let shard = (series.series_ref % self.queues.len() as u64) as usize;
        self.queues[shard].append(series)
    }
}

/// Sends the batches of one shard until it is shut down.
///
/// Full batches are sent as they arrive; a partial batch is sent once the batch send deadline
/// passes without a full batch. On soft shutdown, all pending batches are flushed. On hard
/// shutdown, everything still pending is dropped.
async fn run_shard(
    inner: Arc<Inner>,
    queue: Arc<ShardQueue>,
    mut batches: mpsc::Receiver<Vec<TimeSeries>>,
    soft_shutdown: CancellationToken,
    hard_shutdown: CancellationToken,
) {
    let deadline = inner.config().batch_send_deadline();
    let mut timer = tokio::time::interval_at(Instant::now() + deadline, deadline);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = hard_shutdown.cancelled() => break,
            _ = soft_shutdown.cancelled() => {
                while let Ok(batch) = batches.try_recv() {
                    inner.send_batch(batch, &hard_shutdown).await;
                }
                let partial = queue.take_partial();
                if !partial.is_empty() {
                    inner.send_batch(partial, &hard_shutdown).await;
                }
                break;
            }
            batch = batches.recv() => match batch {
                Some(batch) => {
                    inner.send_batch(batch, &hard_shutdown).await;
                    timer.reset();
                }
                None => break,
            },
            _ = timer.tick() => {
                let partial = queue.take_partial();
                if !partial.is_empty() {
                    inner.send_batch(partial, &hard_shutdown).await;
                }
            }
        }
    }

    while let Ok(batch) = batches.try_recv() {
        inner.drop_on_shutdown(&batch);
    }
    inner.drop_on_shutdown(&queue.take_partial());
}

#[cfg(test)]
mod tests {
    use sluice_labels::Labels;

    use super::*;

    fn rates(data_in: f64, data_out: f64, duration: f64) -> ShardRates {
        ShardRates {
            data_in,
            data_out,
            data_dropped: 0.0,
            data_out_duration: duration,
            delay: 0.0,
        }
    }

    #[test]
    fn test_no_output_keeps_current() {
        assert_eq!(desired_shards(4, 1, 10, &ShardRates::default()), 4);
    }

    #[test]
    fn test_scale_up() {
        // each sample takes 10ms to send, 1000 samples/s arrive: 10 shards are busy
        let rates = rates(1000.0, 100.0, 1.0);
        assert_eq!(desired_shards(1, 1, 50, &rates), 10);
    }

    #[test]
    fn test_within_tolerance() {
        // exactly 4.8 shards busy, rounds up to 5, within 30% of 4
        let rates = rates(480.0, 100.0, 1.0);
        assert_eq!(desired_shards(4, 1, 50, &rates), 4);

        // 6 is outside the band
        let rates = ShardRates {
            data_in: 560.0,
            ..rates
        };
        assert_eq!(desired_shards(4, 1, 50, &rates), 6);
    }

    #[test]
    fn test_bounds() {
        let rates = rates(100_000.0, 100.0, 1.0);
        assert_eq!(desired_shards(5, 1, 20, &rates), 20);

        let rates = ShardRates {
            data_in: 1.0,
            ..rates
        };
        assert_eq!(desired_shards(5, 2, 20, &rates), 2);

        // the current count is clamped even if the estimate is within tolerance
        let rates = ShardRates {
            data_in: 3000.0,
            ..rates
        };
        assert_eq!(desired_shards(30, 1, 20, &rates), 20);
    }

    #[test]
    fn test_no_downshard_while_behind() {
        let behind = ShardRates {
            delay: 30.0,
            ..rates(10.0, 100.0, 1.0)
        };
        assert_eq!(desired_shards(8, 1, 50, &behind), 8);

        let caught_up = ShardRates {
            delay: 1.0,
            ..behind
        };
        assert_eq!(desired_shards(8, 1, 50, &caught_up), 1);
    }

    #[test]
    fn test_backlog_adds_shards() {
        let without = rates(500.0, 100.0, 1.0);
        let with = ShardRates {
            delay: 100.0,
            ..without
        };
        assert!(desired_shards(1, 1, 1000, &with) > desired_shards(1, 1, 1000, &without));
    }

    #[test]
    fn test_dropped_data_is_not_counted() {
        let kept = rates(1000.0, 100.0, 1.0);
        let half_dropped = ShardRates {
            data_dropped: 100.0,
            ..kept
        };
        assert_eq!(desired_shards(1, 1, 50, &half_dropped), 5);
    }

    fn series(series_ref: u64) -> TimeSeries {
        TimeSeries::sample(series_ref, Labels::new(), 0, 1.0)
    }

    #[test]
    fn test_queue_full_batches() {
        let (queue, mut rx) = ShardQueue::new(2, 1);

        queue.append(series(1)).unwrap();
        queue.append(series(2)).unwrap();
        queue.append(series(3)).unwrap();

        // the channel holds one batch, the next full batch is rejected
        let rejected = queue.append(series(4)).unwrap_err();
        assert_eq!(rejected.series_ref, 4);

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.iter().map(|s| s.series_ref).collect::<Vec<_>>(), [1, 2]);

        queue.append(rejected).unwrap();
        assert_eq!(rx.try_recv().unwrap().len(), 2);
        assert!(queue.take_partial().is_empty());
    }
}
