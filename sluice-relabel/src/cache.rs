use std::sync::Arc;

use parking_lot::RwLock;
use sluice_identity::LabelStore;
use sluice_labels::{Labels, is_stale_nan};

use crate::statsd::{RelabelCounters, RelabelGauges};
use crate::{RelabelConfig, process};

/// A cached relabel result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelAndId {
    /// Labels after relabeling, or `None` if the series is dropped.
    pub labels: Option<Labels>,
    /// Global id of the relabeled labels, `0` if the series is dropped.
    pub id: u64,
}

impl LabelAndId {
    /// Returns `true` if relabeling dropped the series.
    pub fn is_dropped(&self) -> bool {
        self.labels.is_none()
    }
}

/// Remembers relabel results per global series id.
///
/// Entries are keyed by the global id of the labels *before* relabeling. A cached drop is kept
/// as an entry without labels, so it is distinguishable from a missing entry.
///
/// The cache does not notice rule changes. Callers that swap rules must [`clear`](Self::clear)
/// it.
#[derive(Debug)]
pub struct RelabelCache {
    name: String,
    store: Arc<LabelStore>,
    entries: RwLock<hashbrown::HashMap<u64, LabelAndId>>,
}

impl RelabelCache {
    /// Creates an empty cache. The name is attached to the cache metrics.
    pub fn new(name: impl Into<String>, store: Arc<LabelStore>) -> Self {
        Self {
            name: name.into(),
            store,
            entries: RwLock::new(hashbrown::HashMap::new()),
        }
    }

    /// Returns the relabel result for a series, evaluating `rules` on a cache miss.
    ///
    /// A `global_ref` of `0` is resolved through the label store first. If `value` is the
    /// staleness marker, the entry is evicted after the result was computed, so the stale sample
    /// is still relabeled once.
    pub fn relabel(
        &self,
        value: f64,
        global_ref: u64,
        labels: &Labels,
        rules: &[RelabelConfig],
    ) -> LabelAndId {
        let global_ref = match global_ref {
            0 => self.store.get_or_add_global_ref_id(labels),
            global_ref => global_ref,
        };

        let cached = self.entries.read().get(&global_ref).cloned();
        let result = match cached {
            Some(result) => {
                sluice_statsd::metric!(
                    counter(RelabelCounters::CacheHit) += 1,
                    cache = &self.name,
                );
                result
            }
            None => {
                sluice_statsd::metric!(
                    counter(RelabelCounters::CacheMiss) += 1,
                    cache = &self.name,
                );
                let result = match process(labels, rules) {
                    Some(relabeled) => LabelAndId {
                        id: self.store.get_or_add_global_ref_id(&relabeled),
                        labels: Some(relabeled),
                    },
                    None => LabelAndId::default(),
                };
                self.entries.write().insert(global_ref, result.clone());
                result
            }
        };

        if is_stale_nan(value) {
            self.entries.write().remove(&global_ref);
        }

        self.report_size();
        result
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.report_size();
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn report_size(&self) {
        sluice_statsd::metric!(
            gauge(RelabelGauges::CacheSize) = self.len() as u64,
            cache = &self.name,
        );
    }
}

#[cfg(test)]
mod tests {
    use sluice_labels::STALE_NAN;

    use super::*;
    use crate::{Action, RelabelRegex};

    fn cache() -> RelabelCache {
        RelabelCache::new("test", Arc::new(LabelStore::default()))
    }

    fn drop_dev() -> Vec<RelabelConfig> {
        vec![RelabelConfig {
            source_labels: vec!["env".to_owned()],
            regex: RelabelRegex::new("dev").unwrap(),
            action: Action::Drop,
            ..Default::default()
        }]
    }

    #[test]
    fn test_hit_after_miss() {
        let cache = cache();
        let labels = Labels::from_pairs([("env", "prod")]);
        let rules = drop_dev();

        let captures = sluice_statsd::with_capturing_test_client(|| {
            let first = cache.relabel(1.0, 0, &labels, &rules);
            let second = cache.relabel(1.0, 0, &labels, &rules);
            assert_eq!(first, second);
            assert_eq!(first.labels, Some(labels.clone()));
        });

        assert_eq!(
            captures,
            [
                "label_store.series:1|g",
                "relabel.cache.miss:1|c|#cache:test",
                "relabel.cache.size:1|g|#cache:test",
                "relabel.cache.hit:1|c|#cache:test",
                "relabel.cache.size:1|g|#cache:test",
            ]
        );
    }

    #[test]
    fn test_cached_drop_is_preserved() {
        let cache = cache();
        let labels = Labels::from_pairs([("env", "dev")]);
        let rules = drop_dev();

        assert!(cache.relabel(1.0, 0, &labels, &rules).is_dropped());
        assert_eq!(cache.len(), 1);

        // the rules are not consulted on a hit
        assert!(cache.relabel(1.0, 0, &labels, &[]).is_dropped());
    }

    #[test]
    fn test_stale_evicts_after_compute() {
        let cache = cache();
        let labels = Labels::from_pairs([("env", "prod")]);
        let rules = drop_dev();

        let result = cache.relabel(STALE_NAN, 0, &labels, &rules);
        assert_eq!(result.labels, Some(labels.clone()));
        assert!(cache.is_empty());

        let captures = sluice_statsd::with_capturing_test_client(|| {
            cache.relabel(1.0, 0, &labels, &rules);
        });
        assert_eq!(captures[0], "relabel.cache.miss:1|c|#cache:test");
    }

    #[test]
    fn test_new_id_of_relabeled_labels() {
        let store = Arc::new(LabelStore::default());
        let cache = RelabelCache::new("test", store.clone());
        let labels = Labels::from_pairs([("a", "1"), ("b", "2")]);
        let rules = vec![RelabelConfig {
            regex: RelabelRegex::new("b").unwrap(),
            action: Action::LabelDrop,
            ..Default::default()
        }];

        let original = store.get_or_add_global_ref_id(&labels);
        let result = cache.relabel(1.0, original, &labels, &rules);

        let relabeled = Labels::from_pairs([("a", "1")]);
        assert_eq!(result.labels, Some(relabeled.clone()));
        assert_eq!(result.id, store.get_or_add_global_ref_id(&relabeled));
        assert_ne!(result.id, original);
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        let labels = Labels::from_pairs([("env", "prod")]);
        cache.relabel(1.0, 0, &labels, &drop_dev());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
