use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sluice_append::{AppendError, AppendHook, Appendable, Appender, Interceptor};
use sluice_identity::LabelStore;
use sluice_labels::{
    Exemplar, FloatHistogram, Histogram, Labels, Metadata, STALE_NAN, is_stale_nan,
};

use crate::statsd::RelabelCounters;
use crate::{LabelAndId, RelabelCache, RelabelConfig};

/// A pipeline stage that relabels every series before forwarding it.
///
/// Results are cached by the global id of the incoming labels. References passed in by the
/// caller are ignored, since they may name the relabeled series of an earlier call. Dropped series
/// are not forwarded. Forwarded data carries the global id of the relabeled labels as its
/// reference.
#[derive(Debug)]
pub struct RelabelStage {
    interceptor: Interceptor<RelabelHook>,
}

impl RelabelStage {
    /// Creates a stage applying `rules` and forwarding to `next`.
    pub fn new(
        store: Arc<LabelStore>,
        rules: Vec<RelabelConfig>,
        next: Arc<dyn Appendable>,
    ) -> Self {
        let hook = RelabelHook {
            cache: RelabelCache::new("pipeline", store),
            rules: RwLock::new(rules),
        };

        Self {
            interceptor: Interceptor::new(hook, Some(next)),
        }
    }

    /// Replaces the rules and purges the cache.
    pub fn update_rules(&self, rules: Vec<RelabelConfig>) {
        let hook = self.interceptor.hook();
        let mut current = hook.rules.write();
        *current = rules;
        hook.cache.clear();
    }

    /// Returns the relabel cache of this stage.
    pub fn cache(&self) -> &RelabelCache {
        &self.interceptor.hook().cache
    }
}

impl Appendable for RelabelStage {
    fn appender(&self) -> Box<dyn Appender> {
        self.interceptor.appender()
    }
}

/// The hook behind [`RelabelStage`].
#[derive(Debug)]
struct RelabelHook {
    cache: RelabelCache,
    rules: RwLock<Vec<RelabelConfig>>,
}

impl RelabelHook {
    fn relabel(&self, value: f64, labels: &Labels) -> Option<LabelAndId> {
        sluice_statsd::metric!(counter(RelabelCounters::Processed) += 1);

        // Holding the read lock keeps rule updates from interleaving with cache inserts.
        let rules = self.rules.read();
        let result = self.cache.relabel(value, 0, labels, &rules);

        if result.is_dropped() {
            sluice_statsd::metric!(counter(RelabelCounters::Dropped) += 1);
            None
        } else {
            sluice_statsd::metric!(counter(RelabelCounters::Outgoing) += 1);
            Some(result)
        }
    }
}

#[async_trait]
impl AppendHook for RelabelHook {
    async fn on_append(
        &self,
        _series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        let Some(LabelAndId {
            labels: Some(labels),
            id,
        }) = self.relabel(value, labels)
        else {
            return Ok(0);
        };

        next.append(id, &labels, timestamp, value).await
    }

    async fn on_append_exemplar(
        &self,
        _series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        let Some(LabelAndId {
            labels: Some(labels),
            id,
        }) = self.relabel(0.0, labels)
        else {
            return Ok(0);
        };

        next.append_exemplar(id, &labels, exemplar).await
    }

    async fn on_append_histogram(
        &self,
        _series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        let stale = histogram.is_some_and(|h| is_stale_nan(h.sum))
            || float_histogram.is_some_and(|h| is_stale_nan(h.sum));
        let value = if stale { STALE_NAN } else { 0.0 };

        let Some(LabelAndId {
            labels: Some(labels),
            id,
        }) = self.relabel(value, labels)
        else {
            return Ok(0);
        };

        next.append_histogram(id, &labels, timestamp, histogram, float_histogram)
            .await
    }

    async fn on_update_metadata(
        &self,
        _series_ref: u64,
        labels: &Labels,
        metadata: &Metadata,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        let Some(LabelAndId {
            labels: Some(labels),
            id,
        }) = self.relabel(0.0, labels)
        else {
            return Ok(0);
        };

        next.update_metadata(id, &labels, metadata).await
    }
}
