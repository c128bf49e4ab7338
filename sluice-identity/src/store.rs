use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sluice_labels::Labels;
use tokio::time::Instant;

use crate::statsd::{LabelStoreCounters, LabelStoreGauges};

/// Default time a series stays stale before its identity is purged.
pub const DEFAULT_STALE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Assigns global ids to label sets and links them to destination-local reference ids.
///
/// All state is guarded by a single lock. Every operation is short and never blocks on I/O.
///
/// Label sets are identified solely by their 64-bit hash. Two distinct label sets with colliding
/// hashes share a global id.
#[derive(Debug)]
pub struct LabelStore {
    inner: Mutex<Inner>,
    stale_duration: Duration,
}

impl LabelStore {
    /// Creates an empty label store purging stale series after `stale_duration`.
    pub fn new(stale_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            stale_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the global id of the label set, allocating a new one on first sight.
    ///
    /// Returns `0` for an empty label set.
    pub fn get_or_add_global_ref_id(&self, labels: &Labels) -> u64 {
        if labels.is_empty() {
            return 0;
        }

        self.lock().get_or_add_global(labels.hash64())
    }

    /// Links a destination-local reference id to the global id of the label set.
    ///
    /// The global id is allocated if the label set was never seen. Returns the global id, or `0`
    /// for an empty label set, in which case nothing is linked.
    pub fn get_or_add_link(&self, destination: &str, local_ref_id: u64, labels: &Labels) -> u64 {
        if labels.is_empty() {
            return 0;
        }

        let mut inner = self.lock();
        let global_ref_id = inner.get_or_add_global(labels.hash64());

        let mapping = inner.mappings.entry_ref(destination).or_default();
        mapping.local_to_global.insert(local_ref_id, global_ref_id);
        mapping.global_to_local.insert(global_ref_id, local_ref_id);

        global_ref_id
    }

    /// Returns the destination-local id linked to a global id, or `0` if there is no link.
    pub fn get_local_ref_id(&self, destination: &str, global_ref_id: u64) -> u64 {
        let inner = self.lock();
        inner
            .mappings
            .get(destination)
            .and_then(|mapping| mapping.global_to_local.get(&global_ref_id))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the global id linked to a destination-local id, or `0` if there is no link.
    pub fn get_global_ref_id(&self, destination: &str, local_ref_id: u64) -> u64 {
        let inner = self.lock();
        inner
            .mappings
            .get(destination)
            .and_then(|mapping| mapping.local_to_global.get(&local_ref_id))
            .copied()
            .unwrap_or(0)
    }

    /// Marks a series as a candidate for removal.
    ///
    /// Marking an already stale series refreshes its timestamp.
    pub fn add_stale_marker(&self, global_ref_id: u64, labels: &Labels) {
        let mut inner = self.lock();
        inner.stale_globals.insert(
            global_ref_id,
            StaleMarker {
                last_marked_stale: Instant::now(),
                label_hash: labels.hash64(),
            },
        );
    }

    /// Removes the stale mark of a series that became active again.
    pub fn remove_stale_marker(&self, global_ref_id: u64) {
        self.lock().stale_globals.remove(&global_ref_id);
    }

    /// Purges every series that has been stale for longer than the stale duration.
    ///
    /// The global id is removed from the hash table and from the mappings of every destination.
    /// A purged label set receives a new global id when it is seen again.
    pub fn check_stale_markers(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        let Inner {
            labels_hash_to_global,
            mappings,
            stale_globals,
            ..
        } = &mut *inner;

        let mut removed: i64 = 0;
        stale_globals.retain(|global_ref_id, marker| {
            if now.duration_since(marker.last_marked_stale) < self.stale_duration {
                return true;
            }

            labels_hash_to_global.remove(&marker.label_hash);
            for mapping in mappings.values_mut() {
                if let Some(local_ref_id) = mapping.global_to_local.remove(global_ref_id) {
                    mapping.local_to_global.remove(&local_ref_id);
                }
            }

            removed += 1;
            false
        });

        if removed > 0 {
            sluice_log::debug!("removed {removed} stale series from the label store");
        }

        sluice_statsd::metric!(counter(LabelStoreCounters::StaleRemoved) += removed);
        sluice_statsd::metric!(gauge(LabelStoreGauges::Series) = labels_hash_to_global.len() as u64);
        sluice_statsd::metric!(gauge(LabelStoreGauges::StaleSeries) = stale_globals.len() as u64);
    }

    /// Returns the number of label sets with a global id.
    pub fn series_count(&self) -> usize {
        self.lock().labels_hash_to_global.len()
    }

    /// Returns the number of series currently marked stale.
    pub fn stale_count(&self) -> usize {
        self.lock().stale_globals.len()
    }

    /// Returns the configured stale duration.
    pub fn stale_duration(&self) -> Duration {
        self.stale_duration
    }
}

impl Default for LabelStore {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_DURATION)
    }
}

/// Critical section of the [`LabelStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Last issued global id.
    global_ref_id: u64,
    labels_hash_to_global: hashbrown::HashMap<u64, u64>,
    mappings: hashbrown::HashMap<String, RemoteWriteMapping>,
    stale_globals: hashbrown::HashMap<u64, StaleMarker>,
}

impl Inner {
    fn get_or_add_global(&mut self, label_hash: u64) -> u64 {
        if let Some(&global_ref_id) = self.labels_hash_to_global.get(&label_hash) {
            return global_ref_id;
        }

        self.global_ref_id += 1;
        self.labels_hash_to_global
            .insert(label_hash, self.global_ref_id);

        sluice_statsd::metric!(
            gauge(LabelStoreGauges::Series) = self.labels_hash_to_global.len() as u64
        );

        self.global_ref_id
    }
}

/// Bidirectional link between local and global ids of one destination.
#[derive(Debug, Default)]
struct RemoteWriteMapping {
    local_to_global: hashbrown::HashMap<u64, u64>,
    global_to_local: hashbrown::HashMap<u64, u64>,
}

#[derive(Debug)]
struct StaleMarker {
    last_marked_stale: Instant,
    label_hash: u64,
}
