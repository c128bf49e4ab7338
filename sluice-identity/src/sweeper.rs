use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::LabelStore;

/// Default interval between two stale sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Spawns a task that runs [`LabelStore::check_stale_markers`] every `interval`.
///
/// The first sweep runs one interval after the call. The task stops when `shutdown` is cancelled.
pub fn spawn_stale_sweeper(
    store: Arc<LabelStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => store.check_stale_markers(),
            }
        }

        sluice_log::debug!("stale sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use sluice_labels::Labels;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_and_stops() {
        sluice_log::init_test!();

        let store = Arc::new(LabelStore::new(Duration::from_secs(60)));
        let labels = Labels::from_pairs([("foo", "bar")]);
        let global = store.get_or_add_global_ref_id(&labels);
        store.add_stale_marker(global, &labels);

        let shutdown = CancellationToken::new();
        let handle = spawn_stale_sweeper(store.clone(), Duration::from_secs(30), shutdown.clone());

        // first sweep at 30s, the marker is not old enough yet
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.series_count(), 1);

        // second sweep at 60s purges it
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.series_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
